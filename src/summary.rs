//! Post-processing over simulated sample arrays
//!
//! Everything here consumes a flat `&[f64]` of draws and produces the
//! numbers a reserving report actually shows: quantiles, a histogram, the
//! percentile rank of a booked figure, and basic moments. Non-finite draws
//! are filtered before any statistic is computed.

use serde::Serialize;

use crate::error::{ReservingError, Result};

/// Mean, spread and range of a sample array.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Histogram with `counts.len()` equal-width bins over `[edges[0],
/// edges[bins]]`; the rightmost bin is closed on both sides.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

/// Drop NaN and infinite draws before summarizing.
pub fn filter_finite(samples: &[f64]) -> Vec<f64> {
    samples.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Basic moments with the sample (`n - 1`) standard deviation.
pub fn summarize(samples: &[f64]) -> Result<SummaryStats> {
    let clean = filter_finite(samples);
    if clean.is_empty() {
        return Err(ReservingError::EmptyInput("samples"));
    }
    let n = clean.len();
    let mean = clean.iter().sum::<f64>() / n as f64;
    let std_dev = if n > 1 {
        let ss: f64 = clean.iter().map(|v| (v - mean) * (v - mean)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    let min = clean.iter().copied().fold(f64::INFINITY, f64::min);
    let max = clean.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(SummaryStats {
        count: n,
        mean,
        std_dev,
        min,
        max,
    })
}

/// Quantiles by linear interpolation between order statistics. `qs` entries
/// outside `[0, 1]` are an error.
pub fn quantiles(samples: &[f64], qs: &[f64]) -> Result<Vec<f64>> {
    let mut clean = filter_finite(samples);
    if clean.is_empty() {
        return Err(ReservingError::EmptyInput("samples"));
    }
    clean.sort_by(f64::total_cmp);
    let n = clean.len();
    let mut out = Vec::with_capacity(qs.len());
    for &q in qs {
        if !(0.0..=1.0).contains(&q) {
            return Err(ReservingError::InsufficientData(
                "quantile level outside [0, 1]",
            ));
        }
        let pos = q * (n - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let frac = pos - lo as f64;
        out.push(clean[lo] + frac * (clean[hi] - clean[lo]));
    }
    Ok(out)
}

/// Equal-width histogram over the finite sample range.
pub fn histogram(samples: &[f64], bins: usize) -> Result<Histogram> {
    if bins == 0 {
        return Err(ReservingError::EmptyInput("histogram bins"));
    }
    let clean = filter_finite(samples);
    if clean.is_empty() {
        return Err(ReservingError::EmptyInput("samples"));
    }
    let min = clean.iter().copied().fold(f64::INFINITY, f64::min);
    let max = clean.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min {
        (max - min) / bins as f64
    } else {
        1.0
    };
    let edges: Vec<f64> = (0..=bins).map(|b| min + b as f64 * width).collect();
    let mut counts = vec![0usize; bins];
    for v in clean {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    Ok(Histogram { edges, counts })
}

/// Fraction of samples strictly below `value`; the sample minimum ranks 0.0.
/// NaN on an empty (or all-non-finite) sample.
pub fn percentile_rank(samples: &[f64], value: f64) -> f64 {
    let clean = filter_finite(samples);
    if clean.is_empty() {
        return f64::NAN;
    }
    let below = clean.iter().filter(|&&v| v < value).count();
    below as f64 / clean.len() as f64
}
