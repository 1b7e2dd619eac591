//! Content fingerprinting
//!
//! SHA-256 over the file bytes plus a canonical serialization of the
//! configuration fields that affect output. Any config field that changes
//! what an analysis produces must flow through [`AnalysisConfig`], or
//! cache entries go stale silently.

use crate::config::AnalysisConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic cache key: (content, analysis configuration)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintKey(String);

impl FingerprintKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix, usable as a stable derived identifier
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint content bytes together with the analysis configuration.
///
/// Struct field order makes the JSON serialization canonical, so identical
/// (content, config) pairs always produce identical keys.
pub fn fingerprint(content: &[u8], config: &AnalysisConfig) -> FingerprintKey {
    let config_json =
        serde_json::to_vec(config).expect("analysis config serialization cannot fail");

    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.update([0u8]); // domain separator between content and config
    hasher.update(&config_json);

    FingerprintKey(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentKind, Depth};

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            agents: vec![AgentKind::Security],
            depth: Depth::Standard,
            model: "claude-3-haiku-20240307".to_string(),
        }
    }

    #[test]
    fn test_deterministic() {
        let a = fingerprint(b"fn main() {}", &config());
        let b = fingerprint(b"fn main() {}", &config());
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_changes_key() {
        let a = fingerprint(b"fn main() {}", &config());
        let b = fingerprint(b"fn main() { }", &config());
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_changes_key() {
        let a = fingerprint(b"fn main() {}", &config());

        let mut deeper = config();
        deeper.depth = Depth::Thorough;
        let b = fingerprint(b"fn main() {}", &deeper);
        assert_ne!(a, b);

        let mut other_model = config();
        other_model.model = "gpt-4o".to_string();
        let c = fingerprint(b"fn main() {}", &other_model);
        assert_ne!(a, c);

        let mut more_agents = config();
        more_agents.agents.push(AgentKind::Performance);
        let d = fingerprint(b"fn main() {}", &more_agents);
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_format() {
        let key = fingerprint(b"x", &config());
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.short().len(), 12);
    }
}
