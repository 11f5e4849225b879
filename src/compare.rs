//! Sample comparison on top of the rank test
//!
//! Decides whether two samples are statistically DIFFERENT. The primitive
//! here never declares two samples "the same"; [`crate::state::JobState`]
//! infers sameness only after the planned sampling budget is exhausted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::mann_whitney::mann_whitney_u;

/// Significance threshold for declaring two samples different.
///
/// Deliberately strict: every adjacent candidate pair is tested on every
/// tick, so a loose threshold would accumulate false positives and send
/// the bisection chasing noise.
pub const SIGNIFICANCE_LEVEL: f64 = 0.001;

/// Outcome of comparing two candidates (or two raw samples).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Not every attempt has completed yet.
    Pending,
    /// The samples differ beyond the significance threshold.
    Different,
    /// No difference detected after exhausting the sampling budget. This is
    /// failure to reject the null hypothesis, not proof of equivalence.
    Same,
    /// Not enough information either way; more samples are needed.
    Unknown,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparison::Pending => "pending",
            Comparison::Different => "different",
            Comparison::Same => "same",
            Comparison::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Compare two samples with the rank test.
///
/// Returns [`Comparison::Different`] when the two-sided p-value clears
/// [`SIGNIFICANCE_LEVEL`], and [`Comparison::Unknown`] otherwise. Empty or
/// degenerate input (all pooled values identical) is Unknown, never an
/// error: an inconclusive test just means more data is needed.
pub fn compare_samples<T: PartialOrd>(a: &[T], b: &[T]) -> Comparison {
    if a.is_empty() || b.is_empty() {
        return Comparison::Unknown;
    }
    match mann_whitney_u(a, b) {
        Ok(p) if p < SIGNIFICANCE_LEVEL => Comparison::Different,
        Ok(_) | Err(_) => Comparison::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_samples_are_unknown() {
        let empty: [f64; 0] = [];
        assert_eq!(compare_samples(&empty, &[1.0]), Comparison::Unknown);
        assert_eq!(compare_samples(&[1.0], &empty), Comparison::Unknown);
        assert_eq!(compare_samples::<f64>(&empty, &empty), Comparison::Unknown);
    }

    #[test]
    fn test_identical_samples_are_unknown() {
        // Degenerate rank-test input must not surface as an error.
        assert_eq!(
            compare_samples(&[7.0; 4], &[7.0; 4]),
            Comparison::Unknown
        );
    }

    #[test]
    fn test_separated_samples_are_different() {
        assert_eq!(
            compare_samples(&[1.0; 6], &[100.0; 6]),
            Comparison::Different
        );
    }

    #[test]
    fn test_overlapping_samples_are_unknown() {
        assert_eq!(
            compare_samples(&[10.0, 12.0, 11.0], &[11.0, 13.0, 10.0]),
            Comparison::Unknown
        );
    }

    #[test]
    fn test_failure_strings_compare_as_samples() {
        let ok = [""; 6];
        let boom = ["Exception: boom"; 6];
        assert_eq!(compare_samples(&ok, &boom), Comparison::Different);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Comparison::Different).unwrap(),
            "\"different\""
        );
        assert_eq!(Comparison::Pending.to_string(), "pending");
    }
}
