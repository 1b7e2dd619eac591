//! Error taxonomy for the triage engine
//!
//! Per-file errors are recovered locally and surface as warnings on the
//! report; only configuration errors are fatal at startup.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    /// Reservation denied; the caller falls back to a local-only result
    #[error("budget exceeded: requested ${requested:.4}, remaining ${remaining:.4}")]
    BudgetExceeded { requested: f64, remaining: f64 },

    #[error("remote agent timed out after {0:?}")]
    AgentTimeout(Duration),

    #[error("remote agent transport failure: {0}")]
    AgentTransport(String),

    #[error("remote agent returned a malformed response: {0}")]
    AgentMalformed(String),

    /// Unreadable persisted entry; treated as a cache miss
    #[error("corrupt cache entry for key {0}")]
    CacheCorruption(String),

    #[error("knowledge base unavailable: {0}")]
    KnowledgeBaseUnavailable(String),

    /// Fatal at startup
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TriageError {
    /// True for the remote-call failures that should release a budget
    /// reservation and downgrade the result instead of aborting
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            TriageError::AgentTimeout(_)
                | TriageError::AgentTransport(_)
                | TriageError::AgentMalformed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_classification() {
        assert!(TriageError::AgentTimeout(Duration::from_secs(30)).is_remote_failure());
        assert!(TriageError::AgentTransport("conn reset".into()).is_remote_failure());
        assert!(TriageError::AgentMalformed("not json".into()).is_remote_failure());
        assert!(!TriageError::BudgetExceeded {
            requested: 1.0,
            remaining: 0.0
        }
        .is_remote_failure());
        assert!(!TriageError::InvalidConfig("bad".into()).is_remote_failure());
    }
}
