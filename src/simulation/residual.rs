//! ODP residual bootstrap
//!
//! Pearson residuals of the observed incremental triangle against the
//! back-fitted one are resampled with replacement, the perturbed triangle is
//! re-squared with freshly estimated age-to-age factors, and process variance
//! is injected into the future cells through a gamma draw whose moments match
//! the over-dispersed Poisson assumption.

use rand::Rng;
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;

use crate::error::{ReservingError, Result};
use crate::simulation::rng::{stream_rng, DOMAIN_DRAW};
use crate::triangle::algebra::{
    age_to_age_factors, fit_from_latest_diagonal, project_forward, to_cumulative, to_incremental,
};
use crate::triangle::{Mask, Triangle};

/// Tolerance on the per-transition regression slope before the transition
/// counts as degenerate.
const UNIT_SLOPE_TOL: f64 = 1e-6;

/// Diagnostics of the residual extraction step, reported once per run.
#[derive(Debug, Clone)]
pub struct ResidualDiagnostics {
    /// Dispersion parameter of the over-dispersed Poisson model.
    pub phi: f64,
    /// Residual degrees of freedom after the clamp.
    pub degrees_of_freedom: usize,
    /// Number of residual cells in the resampling pool.
    pub valid_cells: usize,
    /// True when valid cells minus fitted parameters fell below one.
    pub df_clamped: bool,
    /// Development periods whose observed increments sit on the unit slope
    /// against the back-fit. Their cells carry no residual information and
    /// are left unperturbed during resampling.
    pub degenerate_transitions: Vec<usize>,
}

/// Regression slope of observed on back-fitted increments for one
/// development period. `None` when the column carries nothing to regress on.
fn transition_slope(pairs: &[(f64, f64)]) -> Option<f64> {
    match pairs {
        [] => None,
        [(f, o)] => {
            if *f != 0.0 {
                Some(o / f)
            } else if *o == 0.0 {
                Some(1.0)
            } else {
                None
            }
        }
        _ => {
            let n = pairs.len() as f64;
            let (sum_f, sum_o) = pairs
                .iter()
                .fold((0.0, 0.0), |(sf, so), (f, o)| (sf + f, so + o));
            let (mean_f, mean_o) = (sum_f / n, sum_o / n);
            let mut var = 0.0;
            let mut cov = 0.0;
            for (f, o) in pairs {
                var += (f - mean_f) * (f - mean_f);
                cov += (f - mean_f) * (o - mean_o);
            }
            if var > 0.0 {
                return Some(cov / var);
            }
            // constant fits: only an exact match counts as unit slope
            let scale = pairs.iter().map(|(f, _)| f.abs()).fold(1.0, f64::max);
            pairs
                .iter()
                .all(|(f, o)| (o - f).abs() <= UNIT_SLOPE_TOL * scale)
                .then_some(1.0)
        }
    }
}

/// Prepared bootstrap state: fitted base, residual pool and dispersion.
///
/// Construction does all the deterministic work once; [`simulate`] then
/// replays only the stochastic part per draw.
///
/// [`simulate`]: ResidualBootstrap::simulate
#[derive(Debug, Clone)]
pub struct ResidualBootstrap {
    incremental_base: Triangle,
    base_mask: Mask,
    resample_mask: Mask,
    pool: Vec<f64>,
    diagnostics: ResidualDiagnostics,
    seed: u64,
}

impl ResidualBootstrap {
    /// Extract residuals from an observed cumulative triangle.
    ///
    /// `weights` flags which cells contribute residuals to the pool; a zero
    /// weight keeps the cell in the triangle but out of the resampling.
    pub fn new(cumulative: &Triangle, weights: &Triangle, seed: u64) -> Result<Self> {
        cumulative.ensure_same_shape(weights)?;
        let (rows, cols) = (cumulative.rows(), cumulative.cols());

        let base_mask = cumulative.mask();
        let fitted = fit_from_latest_diagonal(cumulative, &base_mask);
        let incr_obs = to_incremental(cumulative);
        let incr_fit = to_incremental(&fitted);

        // Pearson residuals on the incremental scale, restricted to cells
        // that are observed and carry positive weight.
        let weight_mask = Mask::from_weights(weights);
        let mut resample_mask = Mask::full(rows, cols);
        let mut raw = Vec::new();
        let mut column_pairs: Vec<Vec<(f64, f64)>> = vec![Vec::new(); cols];
        for i in 0..rows {
            for j in 0..cols {
                let obs = incr_obs.get(i, j);
                let fit = incr_fit.get(i, j);
                let usable = obs.is_finite()
                    && fit.is_finite()
                    && weight_mask.get(i, j)
                    && base_mask.get(i, j);
                resample_mask.set(i, j, usable);
                if usable {
                    // a zero back-fit contributes a zero residual, matching
                    // the zero-denominator convention of the link ratios
                    let r = if fit == 0.0 {
                        0.0
                    } else {
                        (obs - fit) / fit.abs().sqrt()
                    };
                    raw.push(r);
                    column_pairs[j].push((fit, obs));
                }
            }
        }
        if raw.is_empty() {
            return Err(ReservingError::InsufficientData(
                "no usable residual cells under the given weights",
            ));
        }

        // A unit regression slope means the back-fit reproduces the column
        // exactly, so its cells hold no residual signal. Flag the transition
        // and leave those cells at their observed values when resampling.
        let mut degenerate_transitions = Vec::new();
        for (j, pairs) in column_pairs.iter().enumerate() {
            let degenerate =
                transition_slope(pairs).is_some_and(|beta| (beta - 1.0).abs() <= UNIT_SLOPE_TOL);
            if degenerate {
                log::warn!(
                    "development period {j}: residual regression slope is unity, \
                     skipping the transition during resampling"
                );
                degenerate_transitions.push(j);
                for i in 0..rows {
                    resample_mask.set(i, j, false);
                }
            }
        }

        let n_valid = raw.len();
        let n_params = rows + cols - 1;
        let raw_df = n_valid as i64 - n_params as i64;
        let df_clamped = raw_df < 1;
        if df_clamped {
            log::warn!(
                "residual degrees of freedom {raw_df} clamped to 1 \
                 ({n_valid} cells, {n_params} parameters)"
            );
        }
        let df = raw_df.max(1) as usize;
        let phi = raw.iter().map(|r| r * r).sum::<f64>() / df as f64;
        let adjust = (n_valid as f64 / df as f64).sqrt();
        let pool: Vec<f64> = raw.iter().map(|r| r * adjust).collect();

        Ok(Self {
            incremental_base: incr_obs,
            base_mask,
            resample_mask,
            pool,
            diagnostics: ResidualDiagnostics {
                phi,
                degrees_of_freedom: df,
                valid_cells: n_valid,
                df_clamped,
                degenerate_transitions,
            },
            seed,
        })
    }

    pub fn diagnostics(&self) -> &ResidualDiagnostics {
        &self.diagnostics
    }

    /// One bootstrap replicate: total simulated ultimate across origin rows.
    fn replicate(&self, draw: u64) -> f64 {
        let mut rng = stream_rng(self.seed, DOMAIN_DRAW, draw);
        let (rows, cols) = (self.incremental_base.rows(), self.incremental_base.cols());
        let phi = self.diagnostics.phi;

        // Resample residuals into every pool cell of the incremental base.
        let mut incr_sim = self.incremental_base.clone();
        for i in 0..rows {
            for j in 0..cols {
                if self.resample_mask.get(i, j) {
                    let r = self.pool[rng.random_range(0..self.pool.len())];
                    let base = self.incremental_base.get(i, j);
                    incr_sim.set(i, j, base + r * base.abs().sqrt());
                }
            }
        }

        // Re-square with factors re-estimated from the perturbed triangle.
        let cum_sim = to_cumulative(&incr_sim);
        let a2a_sim = age_to_age_factors(&cum_sim, &self.base_mask);
        let squared = match project_forward(&cum_sim, &a2a_sim) {
            Ok(t) => t,
            Err(_) => return f64::NAN,
        };
        let mut incr_sqrd = to_incremental(&squared);

        // Process variance on the future cells only.
        for i in 1..rows {
            let start = cols.saturating_sub(i);
            for j in start..cols {
                let m = incr_sqrd.get(i, j).abs();
                if m == 0.0 || !m.is_finite() {
                    continue;
                }
                let v = m * phi;
                if v == 0.0 {
                    // degenerate dispersion collapses the draw to its mean
                    incr_sqrd.set(i, j, m);
                    continue;
                }
                // method of moments: shape m^2/v, scale v/m
                let drawn = Gamma::new(m * m / v, v / m)
                    .map(|g| g.sample(&mut rng))
                    .unwrap_or(m);
                incr_sqrd.set(i, j, drawn);
            }
        }

        let final_col = to_cumulative(&incr_sqrd);
        (0..rows)
            .map(|i| final_col.get(i, cols - 1))
            .filter(|v| v.is_finite())
            .sum()
    }

    /// Run `sample_count` independent replicates. Serial and parallel runs
    /// agree because every replicate owns its stream.
    pub fn simulate(&self, sample_count: usize) -> Vec<f64> {
        (0..sample_count as u64)
            .into_par_iter()
            .map(|draw| self.replicate(draw))
            .collect()
    }
}

/// Convenience entry point: extract residuals and simulate in one call.
pub fn bootstrap_residual_simulate(
    cumulative: &Triangle,
    weights: &Triangle,
    sample_count: usize,
    seed: u64,
) -> Result<Vec<f64>> {
    let engine = ResidualBootstrap::new(cumulative, weights, seed)?;
    log::info!(
        "residual bootstrap: {} cells in pool, phi={:.6}, df={}",
        engine.diagnostics().valid_cells,
        engine.diagnostics().phi,
        engine.diagnostics().degrees_of_freedom
    );
    Ok(engine.simulate(sample_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_cumulative() -> Triangle {
        to_cumulative(
            &Triangle::from_ragged_rows(vec![
                vec![1000.0, 520.0, 260.0, 130.0],
                vec![1100.0, 560.0, 270.0],
                vec![1150.0, 590.0],
                vec![1250.0],
            ])
            .unwrap(),
        )
    }

    fn full_weights(rows: usize, cols: usize) -> Triangle {
        Triangle::filled(rows, cols, 1.0)
    }

    #[test]
    fn test_simulate_returns_requested_count() {
        let cum = sample_cumulative();
        let w = full_weights(4, 4);
        let out = bootstrap_residual_simulate(&cum, &w, 50, 7).unwrap();
        assert_eq!(out.len(), 50);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_draws_yields_empty() {
        let cum = sample_cumulative();
        let w = full_weights(4, 4);
        let out = bootstrap_residual_simulate(&cum, &w, 0, 7).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_same_seed_reproduces_exactly() {
        let cum = sample_cumulative();
        let w = full_weights(4, 4);
        let a = bootstrap_residual_simulate(&cum, &w, 25, 99).unwrap();
        let b = bootstrap_residual_simulate(&cum, &w, 25, 99).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_abs_diff_eq!(x, y, epsilon = 0.0);
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let cum = sample_cumulative();
        let w = full_weights(4, 4);
        let a = bootstrap_residual_simulate(&cum, &w, 10, 1).unwrap();
        let b = bootstrap_residual_simulate(&cum, &w, 10, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_prefix_stability_across_sample_counts() {
        // draw i depends only on (seed, i), so a longer run extends a
        // shorter one without changing its prefix
        let cum = sample_cumulative();
        let w = full_weights(4, 4);
        let short = bootstrap_residual_simulate(&cum, &w, 10, 5).unwrap();
        let long = bootstrap_residual_simulate(&cum, &w, 40, 5).unwrap();
        assert_eq!(short[..], long[..10]);
    }

    #[test]
    fn test_zero_residuals_reproduce_chain_ladder_total() {
        // rows exactly proportional: the back-fit reproduces the observed
        // triangle, every residual is zero and phi degenerates to zero, so
        // each draw must equal the deterministic chain-ladder total
        let cum = Triangle::from_ragged_rows(vec![
            vec![100.0, 150.0, 175.0],
            vec![200.0, 300.0],
            vec![300.0],
        ])
        .unwrap();
        let w = full_weights(3, 3);
        let mask = cum.mask();
        let a2a = age_to_age_factors(&cum, &mask);
        let squared = project_forward(&cum, &a2a).unwrap();
        let expected: f64 = (0..3).map(|i| squared.get(i, 2)).sum();

        let out = bootstrap_residual_simulate(&cum, &w, 20, 3).unwrap();
        for v in out {
            assert_abs_diff_eq!(v, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_df_clamp_on_tiny_triangle() {
        // 2x2 staircase: 3 observed cells, 3 parameters, raw df = 0
        let cum = to_cumulative(
            &Triangle::from_ragged_rows(vec![vec![100.0, 50.0], vec![110.0]]).unwrap(),
        );
        let w = full_weights(2, 2);
        let engine = ResidualBootstrap::new(&cum, &w, 1).unwrap();
        assert!(engine.diagnostics().df_clamped);
        assert_eq!(engine.diagnostics().degrees_of_freedom, 1);
    }

    #[test]
    fn test_all_zero_weights_rejected() {
        let cum = sample_cumulative();
        let w = Triangle::filled(4, 4, 0.0);
        assert!(ResidualBootstrap::new(&cum, &w, 1).is_err());
    }

    #[test]
    fn test_samples_center_near_chain_ladder_ultimate() {
        let cum = sample_cumulative();
        let w = full_weights(4, 4);
        let mask = cum.mask();
        let a2a = age_to_age_factors(&cum, &mask);
        let squared = project_forward(&cum, &a2a).unwrap();
        let ultimate: f64 = (0..4).map(|i| squared.get(i, 3)).sum();

        let out = bootstrap_residual_simulate(&cum, &w, 2000, 11).unwrap();
        let mean = out.iter().sum::<f64>() / out.len() as f64;
        // bootstrap mean should sit within a few percent of the
        // deterministic chain-ladder total
        assert!(
            (mean - ultimate).abs() / ultimate < 0.05,
            "mean {mean} vs ultimate {ultimate}"
        );
    }

    #[test]
    fn test_proportional_rows_flag_every_transition_degenerate() {
        // exactly proportional rows put every column on the unit slope
        let cum = Triangle::from_ragged_rows(vec![
            vec![100.0, 150.0, 175.0],
            vec![200.0, 300.0],
            vec![300.0],
        ])
        .unwrap();
        let engine = ResidualBootstrap::new(&cum, &full_weights(3, 3), 1).unwrap();
        assert_eq!(engine.diagnostics().degenerate_transitions, vec![0, 1, 2]);
    }

    #[test]
    fn test_noisy_transitions_are_not_flagged() {
        // only the single-cell final column back-fits exactly; the noisy
        // earlier columns keep their residual signal
        let cum = sample_cumulative();
        let engine = ResidualBootstrap::new(&cum, &full_weights(4, 4), 1).unwrap();
        assert_eq!(engine.diagnostics().degenerate_transitions, vec![3]);
    }

    #[test]
    fn test_zero_backfit_cells_count_as_zero_residuals() {
        // a flat transition back-fits incremental zeros; those cells stay in
        // the pool as zero residuals instead of dropping out
        let cum = Triangle::from_ragged_rows(vec![
            vec![100.0, 100.0, 130.0],
            vec![200.0, 200.0],
            vec![300.0],
        ])
        .unwrap();
        let engine = ResidualBootstrap::new(&cum, &full_weights(3, 3), 1).unwrap();
        let diag = engine.diagnostics();
        assert_eq!(diag.valid_cells, 6);
        assert!(diag.phi.is_finite());
    }
}
