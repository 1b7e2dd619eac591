//! Core types for the codetriage analysis engine
//!
//! Everything the pipeline hands between components lives here: issue and
//! report records, routing decisions, and the enums that classify them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Severity levels for code issues
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Specialized remote analysis agents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Architect,
    Security,
    Performance,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Architect => "architect",
            AgentKind::Security => "security",
            AgentKind::Performance => "performance",
        }
    }

    /// Domain areas this agent scores individually
    pub fn domain_areas(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Architect => &["design-patterns", "solid-principles", "modularity"],
            AgentKind::Security => &["input-validation", "authentication", "data-protection"],
            AgentKind::Performance => &["algorithmic-efficiency", "memory-usage", "io-efficiency"],
        }
    }
}

/// How deep the analysis should go
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Fast pass, smaller responses
    Quick,
    #[default]
    Standard,
    /// Full analysis, always escalates
    Thorough,
}

impl Depth {
    pub fn name(&self) -> &'static str {
        match self {
            Depth::Quick => "quick",
            Depth::Standard => "standard",
            Depth::Thorough => "thorough",
        }
    }

    pub fn parse(s: &str) -> Option<Depth> {
        match s {
            "quick" => Some(Depth::Quick),
            "standard" => Some(Depth::Standard),
            "thorough" => Some(Depth::Thorough),
            _ => None,
        }
    }
}

/// Risk classification of an input file, supplied by path heuristics
/// or promoted by an anti-pattern match
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    Normal,
    High,
}

/// A specific issue identified in a file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
}

/// Structured result from one remote agent call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: AgentKind,
    /// Overall score 0-100
    pub overall_score: u8,
    pub domain_scores: HashMap<String, u8>,
    pub issues: Vec<Issue>,
    /// Actual cost of the call in dollars
    pub cost: f64,
}

/// What the cost router decided to do with a file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Use the local match, pay nothing
    Skip,
    /// Cheap remote confirmation of the local match
    Validate,
    /// Full paid analysis
    Escalate,
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Skip => "skip",
            Decision::Validate => "validate",
            Decision::Escalate => "escalate",
        }
    }
}

/// Why the router made its decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    BudgetExhausted,
    HighRiskOverride,
    UserForcedDepth,
    HighConfidenceLocal,
    MediumConfidence,
    LowConfidence,
}

impl DecisionReason {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionReason::BudgetExhausted => "budget-exhausted",
            DecisionReason::HighRiskOverride => "high-risk-override",
            DecisionReason::UserForcedDepth => "user-forced-depth",
            DecisionReason::HighConfidenceLocal => "high-confidence-local",
            DecisionReason::MediumConfidence => "medium-confidence",
            DecisionReason::LowConfidence => "low-confidence",
        }
    }
}

/// A routing decision plus the rule that produced it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Routing {
    pub decision: Decision,
    pub reason: DecisionReason,
}

/// Whether a result came from the cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

/// How a file's analysis ultimately completed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisOutcome {
    /// Full remote analysis succeeded
    Analyzed,
    /// Local match confirmed by a cheap remote call
    Validated,
    /// Served from the local pattern match, no remote call
    SkippedLocal,
    /// Something went wrong and we fell back to a local result
    Degraded,
}

impl AnalysisOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisOutcome::Analyzed => "analyzed",
            AnalysisOutcome::Validated => "validated",
            AnalysisOutcome::SkippedLocal => "skipped-local",
            AnalysisOutcome::Degraded => "degraded",
        }
    }
}

/// Complete per-file result record emitted to the rendering collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub language: String,
    /// Composite score 0-100 across contributing agents
    pub overall_score: u8,
    pub issues: Vec<Issue>,
    pub agent_reports: Vec<AgentReport>,
    /// Dollars spent producing this result
    pub cost: f64,
    pub decision: Decision,
    pub reason: DecisionReason,
    pub outcome: AnalysisOutcome,
    pub cache: CacheStatus,
    /// Best local similarity confidence in [0, 1]
    pub confidence: f64,
    pub matched_pattern: Option<String>,
    /// Per-file warnings (degraded analysis, failed agents)
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl FileReport {
    /// Composite score across agent reports (mean, 0 when empty)
    pub fn composite_score(reports: &[AgentReport]) -> u8 {
        if reports.is_empty() {
            return 0;
        }
        let sum: u32 = reports.iter().map(|r| r.overall_score as u32).sum();
        (sum / reports.len() as u32) as u8
    }

    /// Order issues by severity, then by how detailed the description is
    pub fn prioritize_issues(mut issues: Vec<Issue>) -> Vec<Issue> {
        issues.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then(b.description.len().cmp(&a.description.len()))
        });
        issues
    }
}
