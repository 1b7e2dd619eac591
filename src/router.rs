//! Cost router - the routing decision procedure
//!
//! Turns a local similarity confidence, a risk classification, the
//! requested depth, and the remaining budget into one of skip, validate,
//! or escalate. The rules are evaluated top to bottom and the first match
//! wins; the ordering is a deliberate priority policy where the budget
//! gate comes first, safety and explicit user intent outrank automatic
//! cost-saving, and the confidence bands come last.

use crate::types::{Decision, DecisionReason, Depth, RiskClass, Routing};
use std::path::Path;

/// Router inputs for a single file
#[derive(Debug, Clone, Copy)]
pub struct RouteInput {
    /// Best local match confidence in [0, 1]
    pub confidence: f64,
    pub risk: RiskClass,
    pub depth: Depth,
    pub remaining_budget: f64,
}

/// Externally supplied threshold configuration
#[derive(Debug, Clone, Copy)]
pub struct RouterThresholds {
    /// Confidence above this skips remote analysis entirely
    pub skip: f64,
    /// Confidence above this (up to `skip`) gets a cheap confirmation
    pub validate: f64,
    /// Remaining budget at or below this forces local-only results
    pub reserve_floor: f64,
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self {
            skip: crate::config::DEFAULT_SKIP_THRESHOLD,
            validate: crate::config::DEFAULT_VALIDATE_THRESHOLD,
            reserve_floor: 0.0,
        }
    }
}

/// The decision table. Pure function; owns no state.
pub fn route(input: &RouteInput, thresholds: &RouterThresholds) -> Routing {
    // 1. Budget floor: even high-risk files fall back to local-only, so
    //    a run always terminates without going negative.
    if input.remaining_budget <= thresholds.reserve_floor {
        return Routing {
            decision: Decision::Skip,
            reason: DecisionReason::BudgetExhausted,
        };
    }
    // 2. Security-sensitive files get full analysis while budget allows.
    if input.risk == RiskClass::High {
        return Routing {
            decision: Decision::Escalate,
            reason: DecisionReason::HighRiskOverride,
        };
    }
    // 3. Explicit user intent.
    if input.depth == Depth::Thorough {
        return Routing {
            decision: Decision::Escalate,
            reason: DecisionReason::UserForcedDepth,
        };
    }
    // 4-6. Confidence bands.
    if input.confidence > thresholds.skip {
        Routing {
            decision: Decision::Skip,
            reason: DecisionReason::HighConfidenceLocal,
        }
    } else if input.confidence > thresholds.validate {
        Routing {
            decision: Decision::Validate,
            reason: DecisionReason::MediumConfidence,
        }
    } else {
        Routing {
            decision: Decision::Escalate,
            reason: DecisionReason::LowConfidence,
        }
    }
}

/// Path-based risk heuristic: any configured marker appearing in the
/// lowercased path marks the file high risk
pub fn classify_risk(path: &Path, markers: &[String]) -> RiskClass {
    let lower = path.to_string_lossy().to_lowercase();
    if markers.iter().any(|m| lower.contains(m.as_str())) {
        RiskClass::High
    } else {
        RiskClass::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(confidence: f64, risk: RiskClass, depth: Depth, budget: f64) -> RouteInput {
        RouteInput {
            confidence,
            risk,
            depth,
            remaining_budget: budget,
        }
    }

    fn defaults() -> RouterThresholds {
        RouterThresholds::default()
    }

    #[test]
    fn test_confidence_bands_exhaustive() {
        // skip iff c > 0.9, validate iff 0.7 < c <= 0.9, escalate iff c <= 0.7
        for i in 0..=100 {
            let c = i as f64 / 100.0;
            let routing = route(&input(c, RiskClass::Normal, Depth::Standard, 5.0), &defaults());
            let expected = if c > 0.9 {
                Decision::Skip
            } else if c > 0.7 {
                Decision::Validate
            } else {
                Decision::Escalate
            };
            assert_eq!(routing.decision, expected, "confidence {}", c);
        }
    }

    #[test]
    fn test_band_boundaries() {
        let at_skip = route(&input(0.9, RiskClass::Normal, Depth::Standard, 5.0), &defaults());
        assert_eq!(at_skip.decision, Decision::Validate, "0.9 is inside the validate band");

        let at_validate = route(&input(0.7, RiskClass::Normal, Depth::Standard, 5.0), &defaults());
        assert_eq!(at_validate.decision, Decision::Escalate, "0.7 is inside the escalate band");
    }

    #[test]
    fn test_high_risk_always_escalates_with_budget() {
        for i in 0..=100 {
            let c = i as f64 / 100.0;
            let routing = route(&input(c, RiskClass::High, Depth::Standard, 5.0), &defaults());
            assert_eq!(routing.decision, Decision::Escalate);
            assert_eq!(routing.reason, DecisionReason::HighRiskOverride);
        }
    }

    #[test]
    fn test_budget_gate_outranks_everything() {
        let routing = route(&input(0.95, RiskClass::High, Depth::Thorough, 0.0), &defaults());
        assert_eq!(routing.decision, Decision::Skip);
        assert_eq!(routing.reason, DecisionReason::BudgetExhausted);
    }

    #[test]
    fn test_budget_at_reserve_floor_skips() {
        let thresholds = RouterThresholds {
            reserve_floor: 0.5,
            ..defaults()
        };
        let routing = route(&input(0.2, RiskClass::Normal, Depth::Standard, 0.5), &thresholds);
        assert_eq!(routing.reason, DecisionReason::BudgetExhausted);

        let routing = route(&input(0.2, RiskClass::Normal, Depth::Standard, 0.51), &thresholds);
        assert_eq!(routing.decision, Decision::Escalate);
    }

    #[test]
    fn test_thorough_depth_forces_escalation() {
        let routing = route(&input(0.99, RiskClass::Normal, Depth::Thorough, 5.0), &defaults());
        assert_eq!(routing.decision, Decision::Escalate);
        assert_eq!(routing.reason, DecisionReason::UserForcedDepth);
    }

    #[test]
    fn test_scenario_a_high_confidence_skips() {
        let routing = route(&input(0.95, RiskClass::Normal, Depth::Standard, 5.0), &defaults());
        assert_eq!(routing.decision, Decision::Skip);
        assert_eq!(routing.reason, DecisionReason::HighConfidenceLocal);
    }

    #[test]
    fn test_scenario_b_medium_confidence_validates() {
        let routing = route(&input(0.75, RiskClass::Normal, Depth::Standard, 5.0), &defaults());
        assert_eq!(routing.decision, Decision::Validate);
        assert_eq!(routing.reason, DecisionReason::MediumConfidence);
    }

    #[test]
    fn test_scenario_c_low_confidence_escalates() {
        let routing = route(&input(0.3, RiskClass::Normal, Depth::Standard, 5.0), &defaults());
        assert_eq!(routing.decision, Decision::Escalate);
        assert_eq!(routing.reason, DecisionReason::LowConfidence);
    }

    #[test]
    fn test_scenario_d_risk_overrides_high_confidence() {
        let routing = route(&input(0.95, RiskClass::High, Depth::Standard, 5.0), &defaults());
        assert_eq!(routing.decision, Decision::Escalate);
        assert_eq!(routing.reason, DecisionReason::HighRiskOverride);
    }

    #[test]
    fn test_classify_risk_markers() {
        let markers = vec!["auth".to_string(), "crypto".to_string()];
        assert_eq!(
            classify_risk(Path::new("src/auth/login.py"), &markers),
            RiskClass::High
        );
        assert_eq!(
            classify_risk(Path::new("src/CRYPTO/keys.rs"), &markers),
            RiskClass::High
        );
        assert_eq!(
            classify_risk(Path::new("src/render/table.py"), &markers),
            RiskClass::Normal
        );
        assert_eq!(classify_risk(Path::new("src/anything.py"), &[]), RiskClass::Normal);
    }
}
