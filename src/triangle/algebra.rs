//! Triangle algebra: incremental/cumulative transforms, age-to-age factors,
//! back-fitting and forward projection
//!
//! These are the deterministic building blocks every simulation engine rests
//! on. All ratio computations substitute documented defaults on zero or
//! non-finite denominators (1.0 for factors) instead of raising.

use crate::error::{ReservingError, Result};
use crate::triangle::{Mask, Triangle};

/// Running sum along the development axis. NaN cells poison the remainder
/// of their row, which preserves the staircase shape of a triangle.
pub fn to_cumulative(incremental: &Triangle) -> Triangle {
    let mut out = incremental.clone();
    for i in 0..incremental.rows() {
        let mut acc = 0.0;
        for j in 0..incremental.cols() {
            acc += incremental.get(i, j);
            out.set(i, j, acc);
        }
    }
    out
}

/// First difference along the development axis; column 0 is preserved
/// unchanged, making this the exact inverse of [`to_cumulative`].
pub fn to_incremental(cumulative: &Triangle) -> Triangle {
    let mut out = cumulative.clone();
    for i in 0..cumulative.rows() {
        for j in (1..cumulative.cols()).rev() {
            out.set(i, j, cumulative.get(i, j) - cumulative.get(i, j - 1));
        }
    }
    out
}

/// Weighted age-to-age factors from a cumulative triangle.
///
/// For each transition `j -> j+1` the numerator and denominator sum only
/// over origin rows where both columns are valid under `mask` and inside
/// the staircase bound. A zero or non-finite denominator yields the
/// default factor 1.0.
pub fn age_to_age_factors(cumulative: &Triangle, mask: &Mask) -> Vec<f64> {
    let (rows, cols) = (cumulative.rows(), cumulative.cols());
    let mut a2a = Vec::with_capacity(cols.saturating_sub(1));
    for j in 0..cols.saturating_sub(1) {
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..rows {
            if i + j + 1 < cols && mask.get(i, j) && mask.get(i, j + 1) {
                let v0 = cumulative.get(i, j);
                let v1 = cumulative.get(i, j + 1);
                if v0.is_finite() && v1.is_finite() {
                    den += v0;
                    num += v1;
                }
            }
        }
        if den != 0.0 && den.is_finite() {
            a2a.push(num / den);
        } else {
            a2a.push(1.0);
        }
    }
    a2a
}

/// Cumulative-to-ultimate factors: right-to-left running product of a2a.
pub fn age_to_ultimate(a2a: &[f64]) -> Vec<f64> {
    let mut a2u = vec![1.0; a2a.len()];
    let mut acc = 1.0;
    for j in (0..a2a.len()).rev() {
        acc *= a2a[j];
        a2u[j] = acc;
    }
    a2u
}

/// Reconstruct a synthetic fully-observed cumulative triangle from the
/// latest diagonal, walking each row backward dividing by the a2a factors.
///
/// The back-fitted triangle disagrees with the observed one exactly where
/// the global a2a smoothing disagrees with the individual row history;
/// that disagreement is the residual signal the ODP bootstrap consumes.
pub fn fit_from_latest_diagonal(cumulative: &Triangle, mask: &Mask) -> Triangle {
    let (rows, cols) = (cumulative.rows(), cumulative.cols());
    let a2a = age_to_age_factors(cumulative, mask);
    let mut fitted = Triangle::unobserved(rows, cols);
    for i in 0..rows {
        if i >= cols {
            continue;
        }
        let latest = cols - i - 1;
        fitted.set(i, latest, cumulative.get(i, latest));
        for j in (0..latest).rev() {
            let f = if a2a[j] != 0.0 && a2a[j].is_finite() {
                a2a[j]
            } else {
                1.0
            };
            fitted.set(i, j, fitted.get(i, j + 1) / f);
        }
    }
    fitted
}

/// Fill the unobserved staircase of a cumulative triangle forward:
/// `cell[i][j] = cell[i][j-1] * a2a[j-1]` for every future cell.
pub fn project_forward(cumulative: &Triangle, a2a: &[f64]) -> Result<Triangle> {
    let (rows, cols) = (cumulative.rows(), cumulative.cols());
    if a2a.len() + 1 != cols {
        return Err(ReservingError::FactorLength {
            expected: cols.saturating_sub(1),
            actual: a2a.len(),
        });
    }
    let mut out = cumulative.clone();
    for i in 1..rows {
        let start = cols.saturating_sub(i).max(1);
        for j in start..cols {
            out.set(i, j, out.get(i, j - 1) * a2a[j - 1]);
        }
    }
    Ok(out)
}
