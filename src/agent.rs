//! Remote analysis agents
//!
//! One capability interface with a kind parameter instead of parallel
//! type hierarchies: a new specialty is a new [`AgentKind`] value plus
//! prompt configuration, not a new implementation. The engine only sees
//! `dyn AnalysisAgent`, so tests swap in a scripted agent and the
//! medium-confidence validate path can be pointed at a cheaper backend.

use crate::error::TriageError;
use crate::types::{AgentKind, AgentReport, Depth, Issue, Severity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// One file, one specialty, one depth
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub path: String,
    pub language: String,
    pub content: String,
    pub kind: AgentKind,
    pub depth: Depth,
}

/// Black-box remote analysis capability
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    /// Run one billed analysis call. Transport, timeout, and parse
    /// failures come back as the remote-failure error kinds so the
    /// caller can release its reservation and degrade.
    async fn analyze(&self, request: &AgentRequest) -> Result<AgentReport, TriageError>;

    /// Cost estimate in dollars, used to size the budget reservation
    fn estimate_cost(&self, content_len: usize, depth: Depth) -> f64;
}

/// Expected output tokens per depth, for cost estimation
fn expected_output_tokens(depth: Depth) -> f64 {
    match depth {
        Depth::Quick => 256.0,
        Depth::Standard => 1024.0,
        Depth::Thorough => 4096.0,
    }
}

/// HTTP-backed agent speaking the Anthropic messages API
pub struct HttpAgent {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    /// Dollars per input token
    input_rate: f64,
    /// Dollars per output token
    output_rate: f64,
}

impl HttpAgent {
    pub fn new(api_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            input_rate: 0.25e-6,
            output_rate: 1.25e-6,
        })
    }

    pub fn from_settings(settings: &crate::config::Settings) -> Result<Self> {
        Self::new(
            &settings.api_url,
            &settings.api_key,
            &settings.model,
            Duration::from_secs(settings.remote_timeout_secs),
        )
    }

    fn build_prompt(request: &AgentRequest) -> String {
        let domains = request.kind.domain_areas().join(", ");
        format!(
            "Analyze the following {language} code from the perspective of a {kind} expert.\n\
             File: {path}\n\n\
             ```{language}\n{content}\n```\n\n\
             Respond with a single JSON object and nothing else:\n\
             {{\n\
               \"overall_score\": <0-100>,\n\
               \"domain_scores\": {{<score for each of: {domains}>}},\n\
               \"issues\": [{{\"title\": str, \"severity\": \"critical|high|medium|low\", \
             \"description\": str, \"recommendation\": str}}]\n\
             }}",
            language = request.language,
            kind = request.kind.name(),
            path = request.path,
            content = request.content,
            domains = domains,
        )
    }

    fn classify_transport_error(e: reqwest::Error) -> TriageError {
        if e.is_timeout() {
            TriageError::AgentTimeout(Duration::from_secs(0))
        } else {
            TriageError::AgentTransport(e.to_string())
        }
    }
}

/// Wire shape the model is asked to produce
#[derive(Debug, Deserialize)]
struct WireReport {
    overall_score: u8,
    #[serde(default)]
    domain_scores: HashMap<String, u8>,
    #[serde(default)]
    issues: Vec<WireIssue>,
}

#[derive(Debug, Deserialize)]
struct WireIssue {
    title: String,
    severity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    recommendation: String,
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "low" => Severity::Low,
        _ => Severity::Medium,
    }
}

/// Pull the first JSON object out of a model response, tolerating
/// surrounding prose and markdown fences
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[async_trait]
impl AnalysisAgent for HttpAgent {
    async fn analyze(&self, request: &AgentRequest) -> Result<AgentReport, TriageError> {
        let prompt = Self::build_prompt(request);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": expected_output_tokens(request.depth) as u64,
            "messages": [{"role": "user", "content": prompt}],
        });

        debug!(
            path = request.path,
            agent = request.kind.name(),
            depth = request.depth.name(),
            "calling remote agent"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        if !response.status().is_success() {
            return Err(TriageError::AgentTransport(format!(
                "HTTP {} from remote agent",
                response.status()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TriageError::AgentMalformed(e.to_string()))?;

        let text = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| TriageError::AgentMalformed("no content text in response".to_string()))?;

        let json = extract_json(text)
            .ok_or_else(|| TriageError::AgentMalformed("no JSON object in response".to_string()))?;
        let wire: WireReport = serde_json::from_str(json)
            .map_err(|e| TriageError::AgentMalformed(e.to_string()))?;

        // Bill by actual usage when reported, fall back to the estimate
        let cost = match (
            payload["usage"]["input_tokens"].as_f64(),
            payload["usage"]["output_tokens"].as_f64(),
        ) {
            (Some(input), Some(output)) => input * self.input_rate + output * self.output_rate,
            _ => self.estimate_cost(request.content.len(), request.depth),
        };

        let mut domain_scores = wire.domain_scores;
        for domain in request.kind.domain_areas() {
            domain_scores
                .entry(domain.to_string())
                .or_insert(wire.overall_score);
        }

        Ok(AgentReport {
            agent: request.kind,
            overall_score: wire.overall_score.min(100),
            domain_scores,
            issues: wire
                .issues
                .into_iter()
                .map(|i| Issue {
                    title: i.title,
                    severity: parse_severity(&i.severity),
                    description: i.description,
                    recommendation: i.recommendation,
                })
                .collect(),
            cost,
        })
    }

    fn estimate_cost(&self, content_len: usize, depth: Depth) -> f64 {
        // Rough 4 chars/token plus prompt overhead
        let input_tokens = content_len as f64 / 4.0 + 300.0;
        input_tokens * self.input_rate + expected_output_tokens(depth) * self.output_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_response() {
        let text = "Here is my analysis:\n```json\n{\"overall_score\": 70}\n```\nHope that helps.";
        let json = extract_json(text).unwrap();
        let wire: WireReport = serde_json::from_str(json).unwrap();
        assert_eq!(wire.overall_score, 70);
    }

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json("{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_severity_defaults_medium() {
        assert_eq!(parse_severity("critical"), Severity::Critical);
        assert_eq!(parse_severity("something-else"), Severity::Medium);
    }

    #[test]
    fn test_estimate_cost_scales_with_depth_and_size() {
        let agent = HttpAgent::new("http://localhost", "key", "model", Duration::from_secs(30))
            .unwrap();

        let quick = agent.estimate_cost(4000, Depth::Quick);
        let thorough = agent.estimate_cost(4000, Depth::Thorough);
        assert!(thorough > quick, "deeper analysis costs more");

        let small = agent.estimate_cost(100, Depth::Standard);
        let large = agent.estimate_cost(100_000, Depth::Standard);
        assert!(large > small, "bigger files cost more");
        assert!(small > 0.0);
    }

    #[test]
    fn test_prompt_mentions_specialty_and_domains() {
        let request = AgentRequest {
            path: "src/db.py".to_string(),
            language: "python".to_string(),
            content: "x = 1".to_string(),
            kind: AgentKind::Security,
            depth: Depth::Standard,
        };
        let prompt = HttpAgent::build_prompt(&request);
        assert!(prompt.contains("security expert"));
        assert!(prompt.contains("input-validation"));
        assert!(prompt.contains("x = 1"));
    }
}
