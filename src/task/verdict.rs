//! Validator verdicts.

use serde::{Deserialize, Serialize};

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Parsed from the validator's reply
    Judged,
    /// Reply was unusable; the safety default applied
    Ambiguous,
    /// Validator was skipped because a critical step aborted the run
    Aborted,
}

/// Judgement of whether a trace achieved its task.
///
/// # Invariants
/// - `confidence` is in [0, 1]
/// - `source == Ambiguous` implies `!passed && confidence == 0.0`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    passed: bool,
    confidence: f64,
    /// What to redo, fed back into the next planning prompt
    remediation: Option<String>,
    reasoning: String,
    source: VerdictSource,
}

impl ValidationVerdict {
    /// A parsed verdict. Confidence is clamped into [0, 1]; NaN becomes 0.
    pub fn judged(
        passed: bool,
        confidence: f64,
        reasoning: impl Into<String>,
        remediation: Option<String>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            passed,
            confidence,
            remediation: remediation.filter(|r| !r.trim().is_empty()),
            reasoning: reasoning.into(),
            source: VerdictSource::Judged,
        }
    }

    /// The safety default: fail with zero confidence.
    ///
    /// # Postcondition
    /// `!verdict.passed() && verdict.confidence() == 0.0`
    pub fn ambiguous(reasoning: impl Into<String>) -> Self {
        Self {
            passed: false,
            confidence: 0.0,
            remediation: None,
            reasoning: reasoning.into(),
            source: VerdictSource::Ambiguous,
        }
    }

    /// Fail verdict for a run stopped by a critical step.
    pub fn aborted(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            passed: false,
            confidence: 0.0,
            remediation: Some(format!(
                "The previous plan stopped early: {}. Revise or replace that step.",
                reason
            )),
            reasoning: reason,
            source: VerdictSource::Aborted,
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn remediation(&self) -> Option<&str> {
        self.remediation.as_deref()
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn source(&self) -> VerdictSource {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(ValidationVerdict::judged(true, 1.7, "", None).confidence(), 1.0);
        assert_eq!(ValidationVerdict::judged(true, -0.2, "", None).confidence(), 0.0);
        assert_eq!(ValidationVerdict::judged(true, f64::NAN, "", None).confidence(), 0.0);
    }

    #[test]
    fn test_blank_remediation_dropped() {
        let verdict = ValidationVerdict::judged(false, 0.3, "meh", Some("   ".into()));
        assert!(verdict.remediation().is_none());
    }
}
