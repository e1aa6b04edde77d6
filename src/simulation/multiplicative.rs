//! Multiplicative lognormal development simulation
//!
//! Draws run in batches: each batch perturbs the development factors once
//! (a normal draw on the mean, a chi-squared inflation on the variance) and
//! then walks each backlog row forward through a lognormal step whose
//! moments match the perturbed factor. Rows that hit a non-positive value
//! are treated as closed and carried as zero.

use rand_distr::{ChiSquared, Distribution, LogNormal, Normal};
use rayon::prelude::*;

use crate::error::{ReservingError, Result};
use crate::factors::DevFactorSet;
use crate::simulation::rng::{stream_rng, DOMAIN_BATCH_PARAMS, DOMAIN_DRAW};
use crate::triangle::Triangle;

/// Run configuration for the multiplicative engine.
#[derive(Debug, Clone)]
pub struct MultiplicativeConfig {
    /// Total number of draws to return.
    pub sim_total: usize,
    /// Draws per parameter batch; the final batch may be partial.
    pub batch_sim: usize,
    /// Constant subtracted from every simulated total (e.g. booked reserve).
    pub adjustment: f64,
    pub seed: u64,
}

/// Per-batch perturbed factor parameters, one row per draw in the batch.
struct BatchParams {
    /// `mu[d][j]`: perturbed mean factor for draw `d`, period `j`.
    mu: Vec<Vec<f64>>,
    /// `var[d][j]`: inflated variance for draw `d`, period `j`.
    var: Vec<Vec<f64>>,
}

fn draw_batch_params(
    factors: &DevFactorSet,
    rows: usize,
    seed: u64,
    batch: u64,
    batch_len: usize,
) -> BatchParams {
    let n_dev = factors.len();
    let mut rng = stream_rng(seed, DOMAIN_BATCH_PARAMS, batch);
    let mut mu = vec![vec![0.0; n_dev]; batch_len];
    let mut var = vec![vec![0.0; n_dev]; batch_len];
    for j in 0..n_dev {
        let mean_dist = Normal::new(factors.dev[j], factors.sd[j].max(0.0)).ok();
        // degrees of freedom: observed transitions at this age, at least one
        let df = rows.saturating_sub(j + 1).max(1) as f64;
        let chi = ChiSquared::new(df).ok();
        for d in 0..batch_len {
            mu[d][j] = match &mean_dist {
                Some(dist) => dist.sample(&mut rng),
                None => factors.dev[j],
            };
            let infl = match &chi {
                Some(dist) => dist.sample(&mut rng).floor(),
                None => df,
            };
            var[d][j] = infl * factors.sigma[j] / df;
        }
    }
    BatchParams { mu, var }
}

/// Walk one copy of the backlog forward and return its total less the
/// adjustment. `mu`/`var` are this draw's perturbed parameters.
fn walk_draw(
    base: &Triangle,
    mu: &[f64],
    var: &[f64],
    adjustment: f64,
    seed: u64,
    draw: u64,
) -> f64 {
    let mut rng = stream_rng(seed, DOMAIN_DRAW, draw);
    let (rows, cols) = (base.rows(), base.cols());
    let n_dev = mu.len();
    let mut data = base.clone();
    for j in 0..n_dev {
        // only rows whose diagonal has reached this development age move
        let first_row = rows.saturating_sub(j + 1);
        for r in first_row..rows {
            let value = data.get(r, j);
            if value <= 0.0 || !value.is_finite() {
                data.set(r, j + 1, 0.0);
                continue;
            }
            let m = mu[j];
            let v = var[j] / value;
            let m2 = m * m;
            let denom = (m2 + v).sqrt();
            if m2 == 0.0 || denom == 0.0 || !denom.is_finite() {
                data.set(r, j + 1, value);
                continue;
            }
            let lmean = (m2 / denom).ln();
            let lsd = (1.0 + v / m2).ln().sqrt();
            let step = match LogNormal::new(lmean, lsd) {
                Ok(dist) => dist.sample(&mut rng),
                Err(_) => m.abs(),
            };
            data.set(r, j + 1, value * step);
        }
    }
    // totals come off the final column, which a backlog wider than the
    // factor horizon carries through untouched
    let total: f64 = (0..rows)
        .map(|r| data.get(r, cols - 1))
        .filter(|v| v.is_finite())
        .sum();
    total - adjustment
}

/// Simulate `sim_total` reserve outcomes from a cumulative backlog matrix.
///
/// The matrix is widened with zero columns as needed so every row can
/// develop through all `factors.len()` transitions. Output length is
/// exactly `config.sim_total` even when it is not a multiple of the batch
/// size.
pub fn multiplicative_stochastic_simulate(
    backlog: &Triangle,
    factors: &DevFactorSet,
    config: &MultiplicativeConfig,
) -> Result<Vec<f64>> {
    if factors.is_empty() {
        return Err(ReservingError::EmptyInput("development factors"));
    }
    if config.sim_total == 0 {
        return Ok(Vec::new());
    }
    let n_dev = factors.len();
    let rows = backlog.rows();

    // widen to n_dev + 1 columns, NaN-free, so the walk can index freely
    let cols = backlog.cols().max(n_dev + 1);
    let mut base = Triangle::filled(rows, cols, 0.0);
    for i in 0..rows {
        for j in 0..backlog.cols() {
            let v = backlog.get(i, j);
            if v.is_finite() {
                base.set(i, j, v);
            }
        }
    }

    let batch_sim = config.batch_sim.clamp(1, config.sim_total);
    let n_batches = config.sim_total.div_ceil(batch_sim);

    let base_ref = &base;
    let results: Vec<f64> = (0..n_batches as u64)
        .into_par_iter()
        .flat_map_iter(|batch| {
            let start = batch as usize * batch_sim;
            let len = batch_sim.min(config.sim_total - start);
            let params = draw_batch_params(factors, rows, config.seed, batch, len);
            (0..len).map(move |d| {
                walk_draw(
                    base_ref,
                    &params.mu[d],
                    &params.var[d],
                    config.adjustment,
                    config.seed,
                    (start + d) as u64,
                )
            })
        })
        .collect();

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_factors() -> DevFactorSet {
        DevFactorSet {
            dev: vec![1.5, 1.2, 1.05],
            sigma: vec![40.0, 15.0, 5.0],
            sd: vec![0.03, 0.015, 0.008],
        }
    }

    fn sample_backlog() -> Triangle {
        // latest cumulative position of four origin rows, each sitting on
        // its diagonal: row r develops from column (rows - r - 1) onward
        Triangle::from_rows(vec![
            vec![0.0, 0.0, 0.0, 1900.0],
            vec![0.0, 0.0, 1800.0, 0.0],
            vec![0.0, 1600.0, 0.0, 0.0],
            vec![1200.0, 0.0, 0.0, 0.0],
        ])
        .unwrap()
    }

    fn config(sim_total: usize, batch_sim: usize) -> MultiplicativeConfig {
        MultiplicativeConfig {
            sim_total,
            batch_sim,
            adjustment: 0.0,
            seed: 31,
        }
    }

    #[test]
    fn test_output_length_with_partial_final_batch() {
        let out =
            multiplicative_stochastic_simulate(&sample_backlog(), &sample_factors(), &config(103, 25))
                .unwrap();
        assert_eq!(out.len(), 103);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_draws_yields_empty() {
        let out =
            multiplicative_stochastic_simulate(&sample_backlog(), &sample_factors(), &config(0, 25))
                .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_reproducible_for_fixed_seed() {
        let a = multiplicative_stochastic_simulate(
            &sample_backlog(),
            &sample_factors(),
            &config(40, 10),
        )
        .unwrap();
        let b = multiplicative_stochastic_simulate(
            &sample_backlog(),
            &sample_factors(),
            &config(40, 10),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_rows_stay_closed() {
        let backlog = Triangle::filled(3, 4, 0.0);
        let out =
            multiplicative_stochastic_simulate(&backlog, &sample_factors(), &config(20, 20))
                .unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_adjustment_shifts_every_draw() {
        let base =
            multiplicative_stochastic_simulate(&sample_backlog(), &sample_factors(), &config(15, 5))
                .unwrap();
        let mut shifted_cfg = config(15, 5);
        shifted_cfg.adjustment = 500.0;
        let shifted =
            multiplicative_stochastic_simulate(&sample_backlog(), &sample_factors(), &shifted_cfg)
                .unwrap();
        for (a, b) in base.iter().zip(&shifted) {
            assert!((a - 500.0 - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_factor_set_rejected() {
        let factors = DevFactorSet {
            dev: vec![],
            sigma: vec![],
            sd: vec![],
        };
        assert!(
            multiplicative_stochastic_simulate(&sample_backlog(), &factors, &config(5, 5)).is_err()
        );
    }

    #[test]
    fn test_wide_backlog_totals_use_final_column() {
        // a backlog wider than the factor horizon keeps its trailing
        // column; every draw must total that column, not the last
        // developed one
        let backlog = Triangle::from_rows(vec![
            vec![0.0, 0.0, 0.0, 1900.0, 2100.0],
            vec![0.0, 0.0, 1800.0, 0.0, 1950.0],
        ])
        .unwrap();
        let out =
            multiplicative_stochastic_simulate(&backlog, &sample_factors(), &config(10, 5))
                .unwrap();
        for v in out {
            assert!((v - 4050.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mean_tracks_product_of_factors() {
        let factors = sample_factors();
        let cfg = MultiplicativeConfig {
            sim_total: 4000,
            batch_sim: 100,
            adjustment: 0.0,
            seed: 17,
        };
        let out =
            multiplicative_stochastic_simulate(&sample_backlog(), &factors, &cfg).unwrap();
        let mean = out.iter().sum::<f64>() / out.len() as f64;
        // each row develops only through its remaining transitions
        let expected = 1900.0
            + 1800.0 * 1.05
            + 1600.0 * 1.2 * 1.05
            + 1200.0 * 1.5 * 1.2 * 1.05;
        assert!(
            (mean - expected).abs() / expected < 0.05,
            "mean {mean} vs expected {expected}"
        );
    }
}
