//! Stochastic reserve simulation engines
//!
//! Three engines share one RNG discipline ([`rng`]): every draw owns an
//! independent stream keyed by `(seed, domain, draw index)`, so results are
//! reproducible and identical whether the draw loop runs serially or on the
//! rayon pool.

pub mod mack;
pub mod multiplicative;
pub mod residual;
pub mod rng;

pub use mack::{estimate_mack, mack_bootstrap_simulate, MackConfig, MackEstimates};
pub use multiplicative::{multiplicative_stochastic_simulate, MultiplicativeConfig};
pub use residual::{bootstrap_residual_simulate, ResidualBootstrap, ResidualDiagnostics};
