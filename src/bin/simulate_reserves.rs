//! Run all three stochastic reserving engines over a CSV triangle
//!
//! Usage: simulate_reserves <triangle.csv> [weights.csv] [--json]
//!
//! The triangle CSV holds cumulative paid losses, one origin row per line,
//! blank/na cells unobserved. Without a weights file every observed
//! transition gets weight 1. Config via environment variables:
//!   SIM_COUNT, SEED, BATCH_SIM, BOOKED_RESERVE,
//!   REESTIMATE_SIGMA (set to enable), TAIL_SIGMA_FALLBACK

use anyhow::{bail, Context, Result};
use reserving_engine::triangle::algebra::{age_to_age_factors, project_forward};
use reserving_engine::{
    bootstrap_residual_simulate, estimate_dev_factors, fit_tail_curves, load_triangle_csv,
    load_weights_csv, mack_bootstrap_simulate, multiplicative_stochastic_simulate,
    percentile_rank, quantiles, summarize, CurveFitSet, MackConfig, MultiplicativeConfig,
    SummaryStats, Triangle,
};
use serde::Serialize;
use std::env;
use std::time::Instant;

#[derive(Serialize)]
struct SimulationResponse {
    sim_count: usize,
    seed: u64,
    chain_ladder_ultimate: f64,
    paid_to_date: f64,
    engines: Vec<EngineOutput>,
    tail_curves: Option<CurveFitSet>,
    execution_time_ms: u64,
}

#[derive(Serialize)]
struct EngineOutput {
    engine: String,
    stats: SummaryStats,
    quantiles: Vec<QuantilePoint>,
    booked_percentile: Option<f64>,
}

#[derive(Serialize)]
struct QuantilePoint {
    level: f64,
    value: f64,
}

const QUANTILE_LEVELS: [f64; 5] = [0.25, 0.5, 0.75, 0.95, 0.995];

fn engine_output(engine: &str, samples: &[f64], booked: Option<f64>) -> Result<EngineOutput> {
    let stats = summarize(samples).with_context(|| format!("{engine}: empty sample array"))?;
    let values = quantiles(samples, &QUANTILE_LEVELS)?;
    Ok(EngineOutput {
        engine: engine.to_string(),
        stats,
        quantiles: QUANTILE_LEVELS
            .iter()
            .zip(values)
            .map(|(&level, value)| QuantilePoint { level, value })
            .collect(),
        booked_percentile: booked.map(|b| percentile_rank(samples, b)),
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let json_output = args.iter().any(|a| a == "--json");
    let paths: Vec<&String> = args[1..].iter().filter(|a| !a.starts_with("--")).collect();
    if paths.is_empty() {
        bail!("usage: simulate_reserves <triangle.csv> [weights.csv] [--json]");
    }
    let start = Instant::now();

    let sim_count: usize = env::var("SIM_COUNT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);

    let seed: u64 = env::var("SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let batch_sim: usize = env::var("BATCH_SIM")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(250);

    let booked: Option<f64> = env::var("BOOKED_RESERVE")
        .ok()
        .and_then(|s| s.parse().ok());

    let reestimate_sigma = env::var("REESTIMATE_SIGMA").is_ok();

    let tail_sigma_fallback: f64 = env::var("TAIL_SIGMA_FALLBACK")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.01);

    let cumulative = load_triangle_csv(paths[0]).with_context(|| format!("loading {}", paths[0]))?;
    let n = cumulative.rows();

    let weights = match paths.get(1) {
        Some(path) => load_weights_csv(path).with_context(|| format!("loading {path}"))?,
        None => {
            // weight every transition with both cells observed
            let mut w = Triangle::filled(n, cumulative.cols(), 0.0);
            for i in 0..n {
                for k in 0..cumulative.cols().saturating_sub(1) {
                    if cumulative.is_observed(i, k) && cumulative.is_observed(i, k + 1) {
                        w.set(i, k, 1.0);
                    }
                }
            }
            w
        }
    };

    if !json_output {
        println!(
            "Loaded {}x{} triangle from {}, {} draws per engine",
            n,
            cumulative.cols(),
            paths[0],
            sim_count
        );
    }

    // Deterministic baseline
    let mask = cumulative.mask();
    let a2a = age_to_age_factors(&cumulative, &mask);
    let squared = project_forward(&cumulative, &a2a)?;
    let last = cumulative.cols() - 1;
    let chain_ladder_ultimate: f64 = (0..n)
        .map(|i| squared.get(i, last))
        .filter(|v| v.is_finite())
        .sum();
    let paid_to_date: f64 = cumulative
        .latest_diagonal()
        .iter()
        .filter(|v| v.is_finite())
        .sum();

    let mut engines = Vec::new();

    let residual = bootstrap_residual_simulate(&cumulative, &weights, sim_count, seed)?;
    engines.push(engine_output("residual_bootstrap", &residual, booked)?);

    let factors = estimate_dev_factors(&cumulative, &weights)?;
    let mut backlog = Triangle::filled(n, cumulative.cols(), 0.0);
    for (i, v) in cumulative.latest_diagonal().iter().enumerate() {
        if let Some(col) = cumulative.last_observed_col(i) {
            backlog.set(i, col, *v);
        }
    }
    let mult = multiplicative_stochastic_simulate(
        &backlog,
        &factors,
        &MultiplicativeConfig {
            sim_total: sim_count,
            batch_sim,
            adjustment: 0.0,
            seed,
        },
    )?;
    engines.push(engine_output("multiplicative", &mult, booked)?);

    // the Mack engine needs a square triangle; skip it otherwise
    if n == cumulative.cols() {
        let mack = mack_bootstrap_simulate(
            &cumulative,
            &weights,
            &MackConfig {
                sim_count,
                reestimate_sigma,
                tail_sigma_fallback,
                seed,
            },
        )?;
        engines.push(engine_output("mack_bootstrap", &mack, booked)?);
    } else if !json_output {
        println!("Skipping Mack bootstrap: triangle is not square");
    }

    let xs: Vec<f64> = (1..=a2a.len()).map(|i| i as f64).collect();
    let tail_curves = fit_tail_curves(&xs, &a2a, None).ok();

    let response = SimulationResponse {
        sim_count,
        seed,
        chain_ladder_ultimate,
        paid_to_date,
        engines,
        tail_curves,
        execution_time_ms: start.elapsed().as_millis() as u64,
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("\nChain-ladder ultimate: {chain_ladder_ultimate:.2}");
        println!("Paid to date:          {paid_to_date:.2}");
        for eng in &response.engines {
            println!("\n{}:", eng.engine);
            println!("  mean {:.2}  sd {:.2}", eng.stats.mean, eng.stats.std_dev);
            for q in &eng.quantiles {
                println!("  {:>5.1}%: {:.2}", q.level * 100.0, q.value);
            }
            if let Some(p) = eng.booked_percentile {
                println!("  booked at {:.1}th percentile", p * 100.0);
            }
        }
        println!("\nDone in {} ms", response.execution_time_ms);
    }

    Ok(())
}
