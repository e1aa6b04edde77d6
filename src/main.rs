//! Reserving Engine CLI
//!
//! Demo run over a synthetic paid-loss triangle: deterministic chain-ladder,
//! the three stochastic engines, tail-curve fitting and sample summaries.

use reserving_engine::triangle::algebra::{
    age_to_age_factors, project_forward, to_cumulative,
};
use reserving_engine::{
    bootstrap_residual_simulate, estimate_dev_factors, extrapolate, fit_tail_curves,
    mack_bootstrap_simulate, multiplicative_stochastic_simulate, percentile_rank, quantiles,
    summarize, InMemorySampleStore, MackConfig, MultiplicativeConfig, SampleRecord, SampleStore,
    Triangle,
};

const SIM_COUNT: usize = 10_000;
const SEED: u64 = 20_240_817;

fn print_summary(label: &str, samples: &[f64], booked: f64) {
    let stats = summarize(samples).expect("empty sample array");
    let q = quantiles(samples, &[0.5, 0.75, 0.95, 0.995]).expect("quantiles");
    println!("\n{label} ({} draws):", stats.count);
    println!("  Mean:     {:>14.2}", stats.mean);
    println!("  Std Dev:  {:>14.2}", stats.std_dev);
    println!("  50%:      {:>14.2}", q[0]);
    println!("  75%:      {:>14.2}", q[1]);
    println!("  95%:      {:>14.2}", q[2]);
    println!("  99.5%:    {:>14.2}", q[3]);
    println!(
        "  Booked {booked:.0} sits at the {:.1}th percentile",
        percentile_rank(samples, booked) * 100.0
    );
}

fn main() {
    env_logger::init();

    println!("Reserving Engine v0.1.0");
    println!("=======================\n");

    // Synthetic paid-loss triangle, incremental, staircase shape
    let incremental = Triangle::from_ragged_rows(vec![
        vec![3511.0, 3215.0, 2266.0, 1712.0, 1059.0, 587.0],
        vec![4001.0, 3702.0, 2278.0, 1180.0, 956.0],
        vec![4355.0, 3932.0, 1946.0, 1522.0],
        vec![4295.0, 3455.0, 2023.0],
        vec![4150.0, 3747.0],
        vec![5102.0],
    ])
    .expect("triangle construction");
    let cumulative = to_cumulative(&incremental);
    let n = cumulative.rows();

    // staircase weights: transition (i, k) carries weight while both cells
    // are observed
    let mut weights = Triangle::filled(n, n, 0.0);
    for i in 0..n {
        for k in 0..n {
            if i + k + 1 < n {
                weights.set(i, k, 1.0);
            }
        }
    }

    // Deterministic chain-ladder baseline
    let mask = cumulative.mask();
    let a2a = age_to_age_factors(&cumulative, &mask);
    let squared = project_forward(&cumulative, &a2a).expect("projection");
    let ultimate: f64 = (0..n).map(|i| squared.get(i, n - 1)).sum();
    let paid: f64 = cumulative.latest_diagonal().iter().sum();
    let booked = ultimate;

    println!("Chain-ladder baseline:");
    println!("  Paid to date:  {paid:>14.2}");
    println!("  Ultimate:      {ultimate:>14.2}");
    println!("  a2a factors:   {a2a:.4?}");

    let store = InMemorySampleStore::new();

    // ODP residual bootstrap
    let residual = bootstrap_residual_simulate(&cumulative, &weights, SIM_COUNT, SEED)
        .expect("residual bootstrap");
    print_summary("ODP residual bootstrap", &residual, booked);
    store.put(
        "residual",
        SampleRecord {
            engine: "residual_bootstrap".to_string(),
            seed: SEED,
            samples: residual,
        },
    );

    // Multiplicative lognormal walk from the latest diagonal
    let factors = estimate_dev_factors(&cumulative, &weights).expect("dev factors");
    let mut backlog = Triangle::filled(n, n, 0.0);
    for (i, v) in cumulative.latest_diagonal().iter().enumerate() {
        backlog.set(i, n - i - 1, *v);
    }
    let mult_cfg = MultiplicativeConfig {
        sim_total: SIM_COUNT,
        batch_sim: 250,
        adjustment: 0.0,
        seed: SEED,
    };
    let mult = multiplicative_stochastic_simulate(&backlog, &factors, &mult_cfg)
        .expect("multiplicative simulation");
    print_summary("Multiplicative lognormal", &mult, booked);
    store.put(
        "multiplicative",
        SampleRecord {
            engine: "multiplicative".to_string(),
            seed: SEED,
            samples: mult,
        },
    );

    // Mack bootstrap
    let mack_cfg = MackConfig {
        sim_count: SIM_COUNT,
        reestimate_sigma: true,
        tail_sigma_fallback: 0.01,
        seed: SEED,
    };
    let mack = mack_bootstrap_simulate(&cumulative, &weights, &mack_cfg).expect("mack bootstrap");
    print_summary("Mack bootstrap", &mack, booked);
    store.put(
        "mack",
        SampleRecord {
            engine: "mack_bootstrap".to_string(),
            seed: SEED,
            samples: mack,
        },
    );

    // Tail-curve fit on the estimated a2a factors
    let xs: Vec<f64> = (1..=a2a.len()).map(|i| i as f64).collect();
    match fit_tail_curves(&xs, &a2a, None) {
        Ok(fits) => {
            println!("\nTail curves fitted on {} factors:", a2a.len());
            for (family, params) in &fits {
                match params.c {
                    Some(c) => println!(
                        "  {:<14} a={:.5} b={:.5} c={:.1}",
                        family.name(),
                        params.a,
                        params.b,
                        c
                    ),
                    None => println!(
                        "  {:<14} a={:.5} b={:.5}",
                        family.name(),
                        params.a,
                        params.b
                    ),
                }
            }
            let tails = extrapolate(&fits, 3);
            for (family, preds) in tails {
                println!("  {:<14} next 3: {preds:.5?}", family.name());
            }
        }
        Err(e) => println!("\nTail-curve fit skipped: {e}"),
    }

    println!("\nStored {} sample arrays (hit rate {:.2})", store.len(), store.hit_rate());
}
