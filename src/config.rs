//! Configuration for codetriage
//!
//! Settings load from `TRIAGE_*` environment variables with sane defaults.
//! Threshold and budget validation happens once at startup; a bad value
//! there is the only thing allowed to kill a run.

use crate::error::TriageError;
use crate::types::{AgentKind, Depth};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default confidence above which a local match is trusted outright
pub const DEFAULT_SKIP_THRESHOLD: f64 = 0.9;
/// Default confidence above which a cheap confirmation call suffices
pub const DEFAULT_VALIDATE_THRESHOLD: f64 = 0.7;
/// Default similarity at which an anti-pattern match raises an alert
pub const DEFAULT_ANTI_PATTERN_ALERT: f64 = 0.8;
/// Default EMA learning rate for validation feedback
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// The subset of configuration that changes analysis output.
/// Anything here is part of the cache key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    pub agents: Vec<AgentKind>,
    pub depth: Depth,
    pub model: String,
}

/// Full runtime settings for a triage run
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model string, "provider:model-name" or bare model name
    pub model: String,
    pub api_url: String,
    pub api_key: String,
    pub agents: Vec<AgentKind>,
    pub depth: Depth,
    /// Depth used for medium-confidence confirmation calls
    pub validate_depth: Depth,

    pub skip_threshold: f64,
    pub validate_threshold: f64,
    pub anti_pattern_alert: f64,
    pub learning_rate: f64,

    /// Session budget ceiling in dollars
    pub budget_ceiling: f64,
    /// Remaining budget at or below this stops all paid calls
    pub reserve_floor: f64,

    pub cache_ttl_secs: i64,
    pub remote_timeout_secs: u64,
    /// Concurrent remote calls allowed in flight
    pub fan_out: usize,

    pub data_dir: PathBuf,
    /// Lowercase path fragments that mark a file as high risk
    pub high_risk_markers: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "claude-3-haiku-20240307".to_string(),
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: String::new(),
            agents: vec![AgentKind::Architect, AgentKind::Security, AgentKind::Performance],
            depth: Depth::Standard,
            validate_depth: Depth::Quick,
            skip_threshold: DEFAULT_SKIP_THRESHOLD,
            validate_threshold: DEFAULT_VALIDATE_THRESHOLD,
            anti_pattern_alert: DEFAULT_ANTI_PATTERN_ALERT,
            learning_rate: DEFAULT_LEARNING_RATE,
            budget_ceiling: 5.0,
            reserve_floor: 0.0,
            cache_ttl_secs: 7 * 24 * 3600,
            remote_timeout_secs: 60,
            fan_out: 4,
            data_dir: default_data_dir(),
            high_risk_markers: vec![
                "auth".to_string(),
                "security".to_string(),
                "crypto".to_string(),
                "secret".to_string(),
                "password".to_string(),
                "token".to_string(),
                "login".to_string(),
            ],
            include_patterns: vec!["*.py".to_string(), "*.rs".to_string(), "*.js".to_string(), "*.ts".to_string(), "*.go".to_string()],
            exclude_patterns: vec!["target".to_string(), "node_modules".to_string(), "__pycache__".to_string(), ".git".to_string()],
        }
    }
}

impl Settings {
    /// Load settings from environment, falling back to defaults
    pub fn from_env() -> Self {
        let mut s = Settings::default();

        if let Ok(model) = std::env::var("TRIAGE_MODEL") {
            s.model = model;
        }
        s.api_key = api_key_for_provider(&provider_from_model(&s.model)).unwrap_or_default();
        if let Ok(url) = std::env::var("TRIAGE_API_URL") {
            s.api_url = url;
        }
        if let Some(v) = env_f64("TRIAGE_SKIP_THRESHOLD") {
            s.skip_threshold = v;
        }
        if let Some(v) = env_f64("TRIAGE_VALIDATE_THRESHOLD") {
            s.validate_threshold = v;
        }
        if let Some(v) = env_f64("TRIAGE_ANTI_PATTERN_ALERT") {
            s.anti_pattern_alert = v;
        }
        if let Some(v) = env_f64("TRIAGE_LEARNING_RATE") {
            s.learning_rate = v;
        }
        if let Some(v) = env_f64("TRIAGE_BUDGET") {
            s.budget_ceiling = v;
        }
        if let Some(v) = env_f64("TRIAGE_RESERVE_FLOOR") {
            s.reserve_floor = v;
        }
        if let Some(v) = env_i64("TRIAGE_CACHE_TTL_SECS") {
            s.cache_ttl_secs = v;
        }
        if let Some(v) = env_i64("TRIAGE_TIMEOUT_SECS") {
            s.remote_timeout_secs = v.max(1) as u64;
        }
        if let Some(v) = env_i64("TRIAGE_FAN_OUT") {
            s.fan_out = v.max(1) as usize;
        }
        if let Ok(d) = std::env::var("TRIAGE_DEPTH") {
            if let Some(depth) = Depth::parse(&d) {
                s.depth = depth;
            }
        }
        if let Ok(d) = std::env::var("TRIAGE_VALIDATE_DEPTH") {
            if let Some(depth) = Depth::parse(&d) {
                s.validate_depth = depth;
            }
        }
        if let Ok(dir) = std::env::var("TRIAGE_DATA_DIR") {
            s.data_dir = PathBuf::from(dir);
        }

        s
    }

    /// Validate settings that must be correct before any work starts.
    ///
    /// `require_remote` demands an API key, for runs that cannot degrade
    /// to local-only analysis.
    pub fn validate(&self, require_remote: bool) -> Result<(), TriageError> {
        let in_unit = |v: f64| v > 0.0 && v < 1.0;
        if !in_unit(self.skip_threshold) || !in_unit(self.validate_threshold) {
            return Err(TriageError::InvalidConfig(format!(
                "confidence thresholds must be in (0, 1): skip={}, validate={}",
                self.skip_threshold, self.validate_threshold
            )));
        }
        if self.validate_threshold >= self.skip_threshold {
            return Err(TriageError::InvalidConfig(format!(
                "validate threshold {} must be below skip threshold {}",
                self.validate_threshold, self.skip_threshold
            )));
        }
        if !in_unit(self.anti_pattern_alert) {
            return Err(TriageError::InvalidConfig(format!(
                "anti-pattern alert threshold must be in (0, 1): {}",
                self.anti_pattern_alert
            )));
        }
        if !in_unit(self.learning_rate) {
            return Err(TriageError::InvalidConfig(format!(
                "learning rate must be in (0, 1): {}",
                self.learning_rate
            )));
        }
        if self.budget_ceiling < 0.0 || self.reserve_floor < 0.0 {
            return Err(TriageError::InvalidConfig(format!(
                "budget ceiling and reserve floor must be non-negative: ceiling={}, floor={}",
                self.budget_ceiling, self.reserve_floor
            )));
        }
        if self.agents.is_empty() {
            return Err(TriageError::InvalidConfig(
                "at least one analysis agent must be configured".to_string(),
            ));
        }
        if require_remote && self.api_key.is_empty() {
            let provider = provider_from_model(&self.model);
            return Err(TriageError::InvalidConfig(format!(
                "no API key found for provider '{}'; set {}",
                provider,
                key_env_var(&provider).unwrap_or("TRIAGE_API_KEY")
            )));
        }
        Ok(())
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// The cache-key-relevant slice of these settings
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            agents: self.agents.clone(),
            depth: self.depth,
            model: self.model.clone(),
        }
    }
}

/// Extract provider name from a model string like "anthropic:claude-..."
/// or detect it from a bare model name
pub fn provider_from_model(model: &str) -> String {
    if let Some((provider, _)) = model.split_once(':') {
        return provider.to_lowercase();
    }
    let lower = model.to_lowercase();
    if lower.starts_with("gemini") {
        "google".to_string()
    } else if lower.starts_with("claude") {
        "anthropic".to_string()
    } else if lower.starts_with("gpt") || lower.starts_with('o') {
        "openai".to_string()
    } else if lower.starts_with("llama") || lower.starts_with("deepseek") {
        "groq".to_string()
    } else {
        "anthropic".to_string()
    }
}

fn key_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "google" => Some("GEMINI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        _ => None,
    }
}

/// API key lookup: TRIAGE_API_KEY wins, then the provider-specific variable
pub fn api_key_for_provider(provider: &str) -> Option<String> {
    if let Ok(key) = std::env::var("TRIAGE_API_KEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    key_env_var(provider).and_then(|var| std::env::var(var).ok())
}

fn env_f64(var: &str) -> Option<f64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn env_i64(var: &str) -> Option<i64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codetriage")
}
