//! Two-sample Mann-Whitney U rank test
//!
//! Nonparametric test for whether two independent samples are drawn from
//! the same distribution. Returns a two-sided p-value computed with the
//! tie-corrected normal approximation. The engine treats this as an opaque
//! primitive: it only cares whether the p-value clears the significance
//! threshold in [`crate::compare`].
//!
//! The test is generic over the element type so numeric measurement samples
//! and failure-description strings share one code path.

use std::cmp::Ordering;
use thiserror::Error;

/// Errors for degenerate rank-test input.
///
/// Callers in this crate map every variant to an "unknown" comparison
/// outcome rather than surfacing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MannWhitneyError {
    #[error("cannot rank an empty sample")]
    EmptySample,

    #[error("all values are identical; the rank test is undefined")]
    AllIdentical,
}

/// Run the two-sided Mann-Whitney U test on two samples.
///
/// Ranks the pooled samples (ties receive their average rank), computes the
/// U statistic for each side, and converts the larger one to a p-value via
/// the tie-corrected normal approximation without continuity correction.
///
/// # Errors
///
/// Returns [`MannWhitneyError::EmptySample`] if either side is empty and
/// [`MannWhitneyError::AllIdentical`] if every pooled value is tied, which
/// makes the rank variance zero.
pub fn mann_whitney_u<T: PartialOrd>(xs: &[T], ys: &[T]) -> Result<f64, MannWhitneyError> {
    let n1 = xs.len();
    let n2 = ys.len();
    if n1 == 0 || n2 == 0 {
        return Err(MannWhitneyError::EmptySample);
    }
    let n = n1 + n2;

    let value = |i: usize| -> &T {
        if i < n1 {
            &xs[i]
        } else {
            &ys[i - n1]
        }
    };

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| value(a).partial_cmp(value(b)).unwrap_or(Ordering::Equal));

    // Average ranks over runs of tied values, accumulating the tie term
    // sum(t^3 - t) for the variance correction.
    let mut rank_sum_x = 0.0_f64;
    let mut tie_term = 0.0_f64;
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n
            && value(order[start])
                .partial_cmp(value(order[end]))
                .unwrap_or(Ordering::Equal)
                == Ordering::Equal
        {
            end += 1;
        }
        let run = (end - start) as f64;
        // Ranks are 1-based; a run spanning positions start..end shares the
        // average rank (start + 1 + end) / 2.
        let rank = (start as f64 + 1.0 + end as f64) / 2.0;
        for &i in &order[start..end] {
            if i < n1 {
                rank_sum_x += rank;
            }
        }
        tie_term += run * run * run - run;
        start = end;
    }

    let nf = n as f64;
    let correction = 1.0 - tie_term / (nf * nf * nf - nf);
    if correction == 0.0 {
        return Err(MannWhitneyError::AllIdentical);
    }

    let n1f = n1 as f64;
    let n2f = n2 as f64;
    let u1 = n1f * n2f + n1f * (n1f + 1.0) / 2.0 - rank_sum_x;
    let u2 = n1f * n2f - u1;

    let mean = n1f * n2f / 2.0;
    let sd = (correction * n1f * n2f * (nf + 1.0) / 12.0).sqrt();
    let z = (u1.max(u2) - mean) / sd;

    Ok((2.0 * normal_sf(z)).min(1.0))
}

/// Standard normal survival function, 1 - CDF(z).
fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Complementary error function, rational Chebyshev approximation
/// (Numerical Recipes 6.2), fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
            .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}
