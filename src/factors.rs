//! Shared weighted-regression estimation of development factors
//!
//! Produces the `(dev_j, sigma_j, sd_j)` parallel vectors consumed by the
//! multiplicative stochastic engine: per transition the weighted mean link
//! ratio, its Mack process-variance estimate, and the standard error of the
//! weighted mean. Estimation is independent of which simulation engine
//! consumes the result.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::triangle::Triangle;

/// Per-transition development factor, process variance and standard error.
///
/// All three vectors have one entry per development transition `j -> j+1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevFactorSet {
    /// Weighted mean link ratio per transition; 1.0 on a zero denominator.
    pub dev: Vec<f64>,
    /// Mack process-variance estimate per transition ("sigma"); 0 when the
    /// aggregate weight leaves no degrees of freedom.
    pub sigma: Vec<f64>,
    /// Standard error of the weighted mean per transition.
    pub sd: Vec<f64>,
}

impl DevFactorSet {
    /// Number of development transitions covered.
    pub fn len(&self) -> usize {
        self.dev.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dev.is_empty()
    }
}

/// Individual link ratio with the documented zero-denominator default of 0.
#[inline]
fn link_ratio(curr: f64, next: f64) -> f64 {
    if curr == 0.0 || !curr.is_finite() || !next.is_finite() {
        0.0
    } else {
        next / curr
    }
}

/// Estimate [`DevFactorSet`] from a cumulative triangle and a weight matrix
/// of the same shape.
///
/// The weighted mean per transition is
/// `sum(tri[i][j+1] * w[i][j]) / sum(tri[i][j] * w[i][j])` over the origin
/// rows inside the staircase bound, defaulting to 1.0 when the denominator
/// is zero. Sigma is the weight-and-volume weighted squared deviation of the
/// individual link ratios from that mean, with `n - 1` in the denominator;
/// the final transition with no degrees of freedom falls back to the Mack
/// tail interpolation from the two preceding sigmas.
pub fn estimate_dev_factors(cumulative: &Triangle, weights: &Triangle) -> Result<DevFactorSet> {
    cumulative.ensure_same_shape(weights)?;
    let (rows, cols) = (cumulative.rows(), cumulative.cols());
    let transitions = cols.saturating_sub(1);

    let mut dev = Vec::with_capacity(transitions);
    for j in 0..transitions {
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..rows {
            if i + j + 1 >= cols {
                continue;
            }
            let v0 = cumulative.get(i, j);
            let v1 = cumulative.get(i, j + 1);
            let w = weights.get(i, j);
            if v0.is_finite() && v1.is_finite() && w.is_finite() {
                num += v1 * w;
                den += v0 * w;
            }
        }
        dev.push(if den == 0.0 { 1.0 } else { num / den });
    }

    let mut sigma: Vec<f64> = Vec::with_capacity(transitions);
    let mut sd = Vec::with_capacity(transitions);
    for j in 0..transitions {
        let mut num = 0.0;
        let mut weight_sum = 0.0;
        let mut volume_sum = 0.0;
        for i in 0..rows {
            if i + j + 1 >= cols {
                continue;
            }
            let v0 = cumulative.get(i, j);
            let v1 = cumulative.get(i, j + 1);
            let w = weights.get(i, j);
            if !(v0.is_finite() && v1.is_finite() && w.is_finite()) {
                continue;
            }
            let l = link_ratio(v0, v1);
            let diff = l - dev[j];
            num += w * v0 * diff * diff;
            weight_sum += w;
            volume_sum += w * v0;
        }

        if weight_sum > 1.0 {
            let s = (num / (weight_sum - 1.0)).sqrt();
            sigma.push(s);
            sd.push(if volume_sum > 0.0 {
                s / volume_sum.sqrt()
            } else {
                0.0
            });
        } else if j + 1 == transitions && j >= 2 && sigma[j - 2] != 0.0 && volume_sum > 0.0 {
            // Mack tail interpolation from the two preceding transitions.
            let s_prev = sigma[j - 1];
            let s_prev2 = sigma[j - 2];
            let s = (s_prev.powi(4) / s_prev2.powi(2))
                .min(s_prev2.powi(2).min(s_prev.powi(2)));
            sigma.push(s);
            sd.push(s / volume_sum.sqrt());
        } else {
            sigma.push(0.0);
            sd.push(0.0);
        }
    }

    Ok(DevFactorSet { dev, sigma, sd })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::triangle::algebra::to_cumulative;

    fn cum_triangle() -> Triangle {
        to_cumulative(
            &Triangle::from_ragged_rows(vec![
                vec![100.0, 60.0, 20.0, 5.0],
                vec![110.0, 60.0, 22.0],
                vec![105.0, 58.0],
                vec![120.0],
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_dev_is_weighted_column_ratio() {
        let cum = cum_triangle();
        let w = Triangle::filled(4, 4, 1.0);
        let set = estimate_dev_factors(&cum, &w).unwrap();
        assert_eq!(set.len(), 3);
        // transition 0: rows 0..3 observed at both columns
        let num = 160.0 + 170.0 + 163.0;
        let den = 100.0 + 110.0 + 105.0;
        assert_abs_diff_eq!(set.dev[0], num / den, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_weight_column_defaults() {
        let cum = cum_triangle();
        let mut w = Triangle::filled(4, 4, 1.0);
        for i in 0..4 {
            w.set(i, 0, 0.0);
        }
        let set = estimate_dev_factors(&cum, &w).unwrap();
        assert_eq!(set.dev[0], 1.0);
        assert_eq!(set.sigma[0], 0.0);
        assert_eq!(set.sd[0], 0.0);
    }

    #[test]
    fn test_degenerate_single_row_transition_has_zero_sigma() {
        let cum = cum_triangle();
        let w = Triangle::filled(4, 4, 1.0);
        let set = estimate_dev_factors(&cum, &w).unwrap();
        // the last transition has a single contributing row; without the two
        // preceding sigmas being nonzero-and-populated it may interpolate,
        // but the result must be finite and non-negative
        assert!(set.sigma[2] >= 0.0);
        assert!(set.sigma[2].is_finite());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let cum = cum_triangle();
        let w = Triangle::filled(3, 4, 1.0);
        assert!(estimate_dev_factors(&cum, &w).is_err());
    }

    #[test]
    fn test_constant_link_ratios_give_zero_sigma() {
        // perfectly multiplicative triangle: every link ratio identical
        let cum = to_cumulative(
            &Triangle::from_ragged_rows(vec![
                vec![100.0, 100.0, 50.0],
                vec![200.0, 200.0],
                vec![400.0],
            ])
            .unwrap(),
        );
        let w = Triangle::filled(3, 3, 1.0);
        let set = estimate_dev_factors(&cum, &w).unwrap();
        assert_abs_diff_eq!(set.dev[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(set.sigma[0], 0.0, epsilon = 1e-12);
    }
}
