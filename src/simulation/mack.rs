//! Mack bootstrap
//!
//! Resamples the whole observed triangle column by column under lognormal
//! noise whose moments come from the Mack point estimates, re-estimates the
//! development factors (and optionally the sigmas) from each resampled
//! triangle, and simulates the unobserved half one step ahead. The spread of
//! the resulting ultimates captures both estimation and process error.

use rand_distr::{Distribution, LogNormal};
use rayon::prelude::*;

use crate::error::{ReservingError, Result};
use crate::simulation::rng::{stream_rng, DOMAIN_DRAW};
use crate::triangle::Triangle;

/// Run configuration for the Mack bootstrap.
#[derive(Debug, Clone)]
pub struct MackConfig {
    pub sim_count: usize,
    /// Re-estimate the sigma vector from every resampled triangle instead of
    /// reusing the point estimates.
    pub reestimate_sigma: bool,
    /// Sigma substituted for a development column with zero total weight.
    pub tail_sigma_fallback: f64,
    pub seed: u64,
}

/// Mack point estimates on the observed triangle.
#[derive(Debug, Clone)]
pub struct MackEstimates {
    /// Volume-weighted development factors per transition.
    pub ldf: Vec<f64>,
    /// Standard deviation parameters per transition, after tail smoothing
    /// and the weight-sum substitution rules.
    pub sigma: Vec<f64>,
}

/// Individual development factor; zero when the denominator vanishes.
fn individual_factor(num: f64, den: f64) -> f64 {
    if den != 0.0 && den.is_finite() && num.is_finite() {
        num / den
    } else {
        0.0
    }
}

/// Volume-weighted factor for one transition over the first `n - 1` rows.
/// `next_value` maps a row to the numerator cell, which lets the bootstrap
/// mix resampled numerators with original denominators.
fn weighted_ldf(
    tri: &Triangle,
    weights: &Triangle,
    k: usize,
    n: usize,
    next_value: impl Fn(usize) -> f64,
) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n - 1 {
        let base = tri.get(i, k);
        let f = individual_factor(next_value(i), base);
        let w = weights.get(i, k);
        num += base * f * w;
        den += base * w;
    }
    if den != 0.0 {
        num / den
    } else {
        1.0
    }
}

/// Sigma for one transition: weighted squared deviation of individual
/// factors from the column factor, with an `n - 1` denominator.
fn column_sigma(
    tri: &Triangle,
    weights: &Triangle,
    k: usize,
    n: usize,
    ldf: f64,
    next_value: impl Fn(usize) -> f64,
) -> f64 {
    let mut num = 0.0;
    let mut wsum = 0.0;
    for i in 0..n - 1 {
        let base = tri.get(i, k);
        let f = individual_factor(next_value(i), base);
        let w = weights.get(i, k);
        num += base * w * (f - ldf) * (f - ldf);
        wsum += w;
    }
    if wsum > 1.0 {
        (num / (wsum - 1.0)).sqrt()
    } else {
        0.0
    }
}

/// Total weight in one transition column over the first `n - 1` rows.
fn column_weight_sum(weights: &Triangle, k: usize, n: usize) -> f64 {
    (0..n - 1).map(|i| weights.get(i, k)).sum()
}

/// Mack's tail smoothing for the last transition:
/// `sqrt(min((s1^2 / s0)^2, s1^2, s0^2))` with `s1` the second-to-last and
/// `s0` the third-to-last sigma. Applied only when `s0` is non-zero.
fn smooth_tail_sigma(s1: f64, s0: f64) -> Option<f64> {
    if s0 == 0.0 {
        return None;
    }
    let ratio = s1 * s1 / s0;
    Some((ratio * ratio).min(s1 * s1).min(s0 * s0).sqrt())
}

/// Full sigma vector: per-column estimate, tail smoothing on the last
/// transition, then the weight-sum substitution rules. Rules for column `k`
/// read the already-finalized `sigma[k - 1]`, so columns are processed in
/// order.
fn sigma_vector(
    tri: &Triangle,
    weights: &Triangle,
    n: usize,
    ldf: &[f64],
    fallback: f64,
    next_value: impl Fn(usize, usize) -> f64,
) -> Vec<f64> {
    let mut sigma = vec![0.0; n - 1];
    for k in 0..n - 1 {
        sigma[k] = column_sigma(tri, weights, k, n, ldf[k], |i| next_value(i, k));
        if k == n - 2 && n >= 4 {
            if let Some(s) = smooth_tail_sigma(sigma[k - 1], sigma[k - 2]) {
                sigma[k] = s;
            }
        }
        let wsum = column_weight_sum(weights, k, n);
        if wsum == 1.0 {
            sigma[k] = sigma[k.saturating_sub(1)];
        } else if wsum == 0.0 {
            sigma[k] = fallback;
        }
    }
    sigma
}

fn zero_filled(tri: &Triangle) -> Triangle {
    let mut out = tri.clone();
    for i in 0..out.rows() {
        for j in 0..out.cols() {
            if !out.get(i, j).is_finite() {
                out.set(i, j, 0.0);
            }
        }
    }
    out
}

/// Point estimates of the Mack development factors and sigmas.
pub fn estimate_mack(
    triangle: &Triangle,
    weights: &Triangle,
    tail_sigma_fallback: f64,
) -> Result<MackEstimates> {
    triangle.ensure_same_shape(weights)?;
    let n = triangle.rows();
    if triangle.cols() != n {
        return Err(ReservingError::ShapeMismatch {
            expected_rows: n,
            expected_cols: n,
            actual_rows: triangle.rows(),
            actual_cols: triangle.cols(),
        });
    }
    if n < 2 {
        return Err(ReservingError::InsufficientData(
            "Mack estimation needs at least a 2x2 triangle",
        ));
    }
    let tri = zero_filled(triangle);
    let w = zero_filled(weights);

    let mut ldf = vec![1.0; n - 1];
    for k in 0..n - 1 {
        ldf[k] = weighted_ldf(&tri, &w, k, n, |i| tri.get(i, k + 1));
    }
    let sigma = sigma_vector(&tri, &w, n, &ldf, tail_sigma_fallback, |i, k| {
        tri.get(i, k + 1)
    });
    Ok(MackEstimates { ldf, sigma })
}

/// Lognormal parameters `(mu, sd)` matching mean `mean` and variance ratio
/// `vr = variance / mean^2`. None when the mean is non-positive.
fn lognormal_params(mean: f64, vr: f64) -> Option<(f64, f64)> {
    if mean <= 0.0 || !mean.is_finite() || vr < 0.0 || !vr.is_finite() {
        return None;
    }
    let log_term = (vr + 1.0).ln();
    Some((mean.ln() - 0.5 * log_term, log_term.sqrt()))
}

struct MackBootstrap {
    tri: Triangle,
    weights: Triangle,
    estimates: MackEstimates,
    /// Precomputed lognormal parameters per cell for the resampling pass,
    /// indexed `[row][transition]`; None for cells the chain cannot reach.
    resample_params: Vec<Vec<Option<(f64, f64)>>>,
    config: MackConfig,
}

impl MackBootstrap {
    fn new(triangle: &Triangle, weights: &Triangle, config: MackConfig) -> Result<Self> {
        let estimates = estimate_mack(triangle, weights, config.tail_sigma_fallback)?;
        let tri = zero_filled(triangle);
        let w = zero_filled(weights);
        let n = tri.rows();

        let mut resample_params = vec![vec![None; n - 1]; n];
        for i in 0..n {
            for k in 0..n - 1 {
                let x = tri.get(i, k);
                if x <= 0.0 {
                    continue;
                }
                let mean = estimates.ldf[k] * x;
                if mean <= 0.0 {
                    continue;
                }
                let vr = x * estimates.sigma[k] * estimates.sigma[k] / (mean * mean);
                resample_params[i][k] = lognormal_params(mean, vr);
            }
        }
        Ok(Self {
            tri,
            weights: w,
            estimates,
            resample_params,
            config,
        })
    }

    fn replicate(&self, draw: u64) -> f64 {
        let mut rng = stream_rng(self.config.seed, DOMAIN_DRAW, draw);
        let n = self.tri.rows();

        // Resample the full triangle from column 0 outward. A cell whose
        // predecessor is zero (or whose parameters were unavailable) stays
        // zero, so a closed chain stays closed.
        let mut boot = Triangle::filled(n, n, 0.0);
        for i in 0..n {
            boot.set(i, 0, self.tri.get(i, 0));
        }
        for i in 0..n {
            for k in 0..n - 1 {
                if boot.get(i, k) == 0.0 {
                    continue;
                }
                if let Some((mu, sd)) = self.resample_params[i][k] {
                    if let Ok(dist) = LogNormal::new(mu, sd) {
                        boot.set(i, k + 1, dist.sample(&mut rng));
                    }
                }
            }
        }

        // Re-estimate the factors from the resampled triangle. Numerators
        // come from the bootstrap, denominators from the original triangle.
        let mut ldf_boot = vec![1.0; n - 1];
        for k in 0..n - 1 {
            ldf_boot[k] = weighted_ldf(&self.tri, &self.weights, k, n, |i| boot.get(i, k + 1));
        }

        let sigma_boot = if self.config.reestimate_sigma {
            sigma_vector(
                &self.tri,
                &self.weights,
                n,
                &ldf_boot,
                self.config.tail_sigma_fallback,
                |i, k| boot.get(i, k + 1),
            )
        } else {
            self.estimates.sigma.clone()
        };

        // One-step-ahead simulation of the unobserved half.
        let mut simu = self.tri.clone();
        for i in 0..n {
            for k in 0..n - 1 {
                if i + k + 1 < n {
                    continue;
                }
                let prev = simu.get(i, k);
                if prev <= 0.0 {
                    continue;
                }
                let mean = ldf_boot[k] * prev;
                if mean <= 0.0 {
                    continue;
                }
                let vr = prev * sigma_boot[k] * sigma_boot[k] / (mean * mean);
                if let Some((mu, sd)) = lognormal_params(mean, vr) {
                    if let Ok(dist) = LogNormal::new(mu, sd) {
                        simu.set(i, k + 1, dist.sample(&mut rng));
                    }
                }
            }
        }

        (0..n).map(|i| simu.get(i, n - 1)).sum()
    }

    fn simulate(&self) -> Vec<f64> {
        (0..self.config.sim_count as u64)
            .into_par_iter()
            .map(|draw| self.replicate(draw))
            .collect()
    }
}

/// Simulate `config.sim_count` ultimates via the Mack bootstrap.
pub fn mack_bootstrap_simulate(
    triangle: &Triangle,
    weights: &Triangle,
    config: &MackConfig,
) -> Result<Vec<f64>> {
    let engine = MackBootstrap::new(triangle, weights, config.clone())?;
    log::info!(
        "mack bootstrap: n={}, ldf={:?}, reestimate_sigma={}",
        triangle.rows(),
        engine.estimates.ldf,
        config.reestimate_sigma
    );
    Ok(engine.simulate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangle::algebra::to_cumulative;
    use approx::assert_abs_diff_eq;

    fn sample_triangle() -> Triangle {
        to_cumulative(
            &Triangle::from_ragged_rows(vec![
                vec![2000.0, 900.0, 400.0, 150.0],
                vec![2200.0, 980.0, 430.0],
                vec![2400.0, 1060.0],
                vec![2600.0],
            ])
            .unwrap(),
        )
    }

    // weight cell (i, k) covers transition k of origin row i; only
    // transitions with both cells observed carry weight
    fn staircase_weights() -> Triangle {
        let mut w = Triangle::filled(4, 4, 0.0);
        for i in 0..4 {
            for k in 0..4 {
                if i + k + 1 < 4 {
                    w.set(i, k, 1.0);
                }
            }
        }
        w
    }

    fn config(sim_count: usize) -> MackConfig {
        MackConfig {
            sim_count,
            reestimate_sigma: false,
            tail_sigma_fallback: 0.01,
            seed: 53,
        }
    }

    #[test]
    fn test_point_ldf_matches_volume_weighting() {
        let tri = sample_triangle();
        let est = estimate_mack(&tri, &staircase_weights(), 0.01).unwrap();
        // first transition: all three rows with an observed successor
        let num = 2900.0 + 3180.0 + 3460.0;
        let den = 2000.0 + 2200.0 + 2400.0;
        assert_abs_diff_eq!(est.ldf[0], num / den, epsilon = 1e-12);
        assert!(est.ldf.iter().all(|f| f.is_finite()));
    }

    #[test]
    fn test_zero_weight_column_takes_fallback_sigma() {
        let tri = sample_triangle();
        let mut w = staircase_weights();
        for i in 0..3 {
            w.set(i, 1, 0.0);
        }
        let est = estimate_mack(&tri, &w, 0.25).unwrap();
        assert_abs_diff_eq!(est.sigma[1], 0.25, epsilon = 0.0);
    }

    #[test]
    fn test_single_weight_column_inherits_previous_sigma() {
        let tri = sample_triangle();
        // drop one of the two weighted rows in column 1, leaving wsum == 1
        let mut w = staircase_weights();
        w.set(1, 1, 0.0);
        let est = estimate_mack(&tri, &w, 0.01).unwrap();
        assert_abs_diff_eq!(est.sigma[1], est.sigma[0], epsilon = 0.0);
    }

    #[test]
    fn test_non_square_rejected() {
        let tri = Triangle::unobserved(3, 4);
        let w = Triangle::unobserved(3, 4);
        assert!(estimate_mack(&tri, &w, 0.01).is_err());
    }

    #[test]
    fn test_simulation_count_and_determinism() {
        let tri = sample_triangle();
        let w = staircase_weights();
        let a = mack_bootstrap_simulate(&tri, &w, &config(60)).unwrap();
        let b = mack_bootstrap_simulate(&tri, &w, &config(60)).unwrap();
        assert_eq!(a.len(), 60);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn test_zero_draws_yields_empty() {
        let tri = sample_triangle();
        let w = staircase_weights();
        let out = mack_bootstrap_simulate(&tri, &w, &config(0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_reestimate_sigma_changes_output() {
        let tri = sample_triangle();
        let w = staircase_weights();
        let fixed = mack_bootstrap_simulate(&tri, &w, &config(30)).unwrap();
        let mut cfg = config(30);
        cfg.reestimate_sigma = true;
        let reest = mack_bootstrap_simulate(&tri, &w, &cfg).unwrap();
        assert_ne!(fixed, reest);
    }

    #[test]
    fn test_mean_near_chain_ladder_ultimate() {
        let tri = sample_triangle();
        let w = staircase_weights();
        let est = estimate_mack(&tri, &w, 0.01).unwrap();
        let mut expected = 0.0;
        for i in 0..4 {
            let mut v = tri.get(i, 3 - i);
            for k in 3 - i..3 {
                v *= est.ldf[k];
            }
            expected += v;
        }
        let out = mack_bootstrap_simulate(&tri, &w, &config(3000)).unwrap();
        let mean = out.iter().sum::<f64>() / out.len() as f64;
        assert!(
            (mean - expected).abs() / expected < 0.05,
            "mean {mean} vs expected {expected}"
        );
    }
}
