//! Threat detection: independent static and dynamic entry points plus the
//! score-combination rule the orchestrator applies.

pub mod dynamic_analyzer;
pub mod static_analyzer;

pub use dynamic_analyzer::{DynamicAnalysis, DynamicAnalyzer};
pub use static_analyzer::{StaticAnalysis, StaticAnalyzer};

use crate::models::activity::ActivityReport;
use crate::models::signature::SignatureRegistry;

/// Static score above which the orchestrator escalates the effective
/// security level to high before execution.
pub const ESCALATION_THRESHOLD: f64 = 0.2;

/// Facade over both analysis passes. Neither entry point mutates shared
/// state, so one detector serves a whole scan (and could serve several).
pub struct ThreatDetector {
    static_analyzer: StaticAnalyzer,
    dynamic_analyzer: DynamicAnalyzer,
}

impl ThreatDetector {
    pub fn new(registry: SignatureRegistry, platform: &str) -> Self {
        Self {
            static_analyzer: StaticAnalyzer::new(),
            dynamic_analyzer: DynamicAnalyzer::new(registry, platform),
        }
    }

    /// Static analysis: file bytes and metadata, no execution.
    pub fn analyze_file(&self, path: &std::path::Path) -> StaticAnalysis {
        self.static_analyzer.analyze(path)
    }

    /// Dynamic analysis: observed activity against the signature set.
    pub fn analyze_report(&self, report: &ActivityReport) -> DynamicAnalysis {
        self.dynamic_analyzer.analyze(report)
    }
}

/// Additive, order-independent, saturating combination of the two scores.
pub fn combine_scores(static_score: f64, dynamic_score: f64) -> f64 {
    round_score((static_score + dynamic_score).min(1.0))
}

/// 2-decimal rounding applied to every externally visible score.
pub(crate) fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combination_saturates_at_one() {
        assert_eq!(combine_scores(0.8, 0.6), 1.0);
        assert_eq!(combine_scores(1.0, 1.0), 1.0);
    }

    #[test]
    fn combination_is_additive_and_order_independent() {
        assert_eq!(combine_scores(0.2, 0.4), 0.6);
        assert_eq!(combine_scores(0.4, 0.2), 0.6);
        assert_eq!(combine_scores(0.0, 0.0), 0.0);
    }

    #[test]
    fn combination_is_monotone_in_either_argument() {
        let base = combine_scores(0.3, 0.2);
        assert!(combine_scores(0.3, 0.3) >= base);
        assert!(combine_scores(0.4, 0.2) >= base);
    }

    #[test]
    fn rounding_is_two_decimals() {
        assert_eq!(round_score(0.30000000000000004), 0.3);
        assert_eq!(round_score(0.456), 0.46);
    }
}
