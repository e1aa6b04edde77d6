//! Reserving Engine - Stochastic loss reserving from claim development triangles
//!
//! This library provides:
//! - Triangle algebra (cumulative/incremental transforms, development factors)
//! - ODP residual bootstrap simulation of reserve outcomes
//! - Batched multiplicative lognormal chain-ladder simulation
//! - Weighted-Mack parametric bootstrap with optional sigma re-estimation
//! - Tail-curve fitting (exponential, Weibull, power, inverse power)
//! - Sample post-processing (quantiles, histograms, percentile ranks)

pub mod curves;
pub mod error;
pub mod factors;
pub mod simulation;
pub mod store;
pub mod summary;
pub mod triangle;

// Re-export commonly used types
pub use curves::{extrapolate, fit_tail_curves, CurveFamily, CurveFitSet, CurveParams};
pub use error::{ReservingError, Result};
pub use factors::{estimate_dev_factors, DevFactorSet};
pub use simulation::{
    bootstrap_residual_simulate, estimate_mack, mack_bootstrap_simulate,
    multiplicative_stochastic_simulate, MackConfig, MultiplicativeConfig, ResidualBootstrap,
};
pub use store::{InMemorySampleStore, SampleRecord, SampleStore};
pub use summary::{histogram, percentile_rank, quantiles, summarize, SummaryStats};
pub use triangle::{load_triangle_csv, load_weights_csv, Mask, Triangle};
