//! Tail-curve families for development-factor extrapolation
//!
//! Four parametric families fitted to user-selected development factors:
//!
//! - **Exponential**: `r(t) = 1 + a * exp(b * t)`
//! - **Weibull**: `r(t) = 1 / (1 - exp(-a * t^b))`
//! - **Power**: `r(t) = a^(b^t)`
//! - **Inverse Power**: `r(t) = 1 + a * (c + t)^b`
//!
//! Each family log-linearizes into a weighted linear regression; see
//! [`fit`] for the closed-form fit and the nonlinear refinement. Goodness
//! of fit is scored in the same transformed space used for fitting, or in
//! the original factor space.

mod fit;

pub use fit::{fit_log_linear, fit_tail_curves};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The four supported tail-curve families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CurveFamily {
    Exponential,
    Weibull,
    Power,
    InversePower,
}

impl CurveFamily {
    pub const ALL: [CurveFamily; 4] = [
        CurveFamily::Exponential,
        CurveFamily::Weibull,
        CurveFamily::Power,
        CurveFamily::InversePower,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CurveFamily::Exponential => "Exponential",
            CurveFamily::Weibull => "Weibull",
            CurveFamily::Power => "Power",
            CurveFamily::InversePower => "Inverse Power",
        }
    }
}

/// Fitted coefficients for one family. `c` is only present for
/// [`CurveFamily::InversePower`] (the shift constant).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    pub a: f64,
    pub b: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
}

/// Families that converged, with their parameters. A family absent from the
/// map failed its fit or validity checks; downstream extrapolation and R²
/// simply skip it.
pub type CurveFitSet = BTreeMap<CurveFamily, CurveParams>;

/// Evaluate one family at a single development index.
pub fn predict(family: CurveFamily, params: &CurveParams, x: f64) -> f64 {
    match family {
        CurveFamily::Exponential => 1.0 + params.a * (params.b * x).exp(),
        CurveFamily::Weibull => 1.0 / (1.0 - (-params.a * x.powf(params.b)).exp()),
        CurveFamily::Power => params.a.powf(params.b.powf(x)),
        CurveFamily::InversePower => {
            let c = params.c.unwrap_or(0.0);
            1.0 + params.a * (c + x).powf(params.b)
        }
    }
}

/// Evaluate every fitted family over the given development indices.
pub fn evaluate_curves(xs: &[f64], fits: &CurveFitSet) -> BTreeMap<CurveFamily, Vec<f64>> {
    fits.iter()
        .map(|(&family, params)| {
            (family, xs.iter().map(|&x| predict(family, params, x)).collect())
        })
        .collect()
}

/// Extrapolated factors per family over development indices `1..=horizon`.
pub fn extrapolate(fits: &CurveFitSet, horizon: usize) -> BTreeMap<CurveFamily, Vec<f64>> {
    let xs: Vec<f64> = (1..=horizon).map(|i| i as f64).collect();
    evaluate_curves(&xs, fits)
}

/// The log-transform applied to a factor for a family's fitting space.
/// Returns None when the value is outside the transform's domain.
pub(crate) fn transform_y(family: CurveFamily, y: f64) -> Option<f64> {
    if !y.is_finite() || y <= 1.0 {
        return None;
    }
    let t = match family {
        CurveFamily::Exponential | CurveFamily::InversePower => (y - 1.0).ln(),
        CurveFamily::Weibull => (y / (y - 1.0)).ln().ln(),
        CurveFamily::Power => y.ln().ln(),
    };
    t.is_finite().then_some(t)
}

/// Unweighted R² via the correlation of standardized values (the manual
/// z-score formulation); NaN when fewer than two valid pairs or either
/// series is constant.
fn manual_r_squared(x: &[f64], y: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    let n = pairs.len() as f64;
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let sx = (pairs.iter().map(|p| (p.0 - mx).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let sy = (pairs.iter().map(|p| (p.1 - my).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    if sx == 0.0 || sy == 0.0 {
        return f64::NAN;
    }
    let r = pairs
        .iter()
        .map(|p| (p.0 - mx) / sx * ((p.1 - my) / sy))
        .sum::<f64>()
        / (n - 1.0);
    r * r
}

/// Weighted R²: `1 - SSres/SStot` around the weighted mean; NaN when the
/// total sum of squares vanishes.
fn weighted_r_squared(observed: &[f64], fitted: &[f64], weights: &[f64]) -> f64 {
    let mut w_sum = 0.0;
    let mut wy_sum = 0.0;
    for ((&y, &f), &w) in observed.iter().zip(fitted).zip(weights) {
        if y.is_finite() && f.is_finite() && w.is_finite() {
            w_sum += w;
            wy_sum += w * y;
        }
    }
    if w_sum <= 0.0 {
        return f64::NAN;
    }
    let y_mean = wy_sum / w_sum;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for ((&y, &f), &w) in observed.iter().zip(fitted).zip(weights) {
        if y.is_finite() && f.is_finite() && w.is_finite() {
            ss_res += w * (y - f).powi(2);
            ss_tot += w * (y - y_mean).powi(2);
        }
    }
    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        f64::NAN
    }
}

/// R² per family computed in the family's own transformed (fitting) space.
pub fn r_squared_transformed(
    fits: &CurveFitSet,
    xs: &[f64],
    observed: &[f64],
    weights: Option<&[f64]>,
) -> BTreeMap<CurveFamily, f64> {
    fits.iter()
        .map(|(&family, params)| {
            let y_true: Vec<f64> = observed
                .iter()
                .map(|&y| transform_y(family, y).unwrap_or(f64::NAN))
                .collect();
            let y_pred: Vec<f64> = xs
                .iter()
                .map(|&x| transform_y(family, predict(family, params, x)).unwrap_or(f64::NAN))
                .collect();
            let r2 = match weights {
                Some(w) => weighted_r_squared(&y_true, &y_pred, w),
                None => manual_r_squared(&y_true, &y_pred),
            };
            (family, r2)
        })
        .collect()
}

/// R² per family computed in the original factor space.
pub fn r_squared_original(
    fits: &CurveFitSet,
    xs: &[f64],
    observed: &[f64],
    weights: Option<&[f64]>,
) -> BTreeMap<CurveFamily, f64> {
    fits.iter()
        .map(|(&family, params)| {
            let y_pred: Vec<f64> = xs.iter().map(|&x| predict(family, params, x)).collect();
            let r2 = match weights {
                Some(w) => weighted_r_squared(observed, &y_pred, w),
                None => manual_r_squared(observed, &y_pred),
            };
            (family, r2)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_predict_exponential() {
        let p = CurveParams { a: 2.0, b: -0.5, c: None };
        assert_abs_diff_eq!(
            predict(CurveFamily::Exponential, &p, 1.0),
            1.0 + 2.0 * (-0.5f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_predict_inverse_power_uses_shift() {
        let p = CurveParams { a: 1.5, b: -1.0, c: Some(3.0) };
        assert_abs_diff_eq!(
            predict(CurveFamily::InversePower, &p, 1.0),
            1.0 + 1.5 / 4.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_transform_rejects_factors_at_or_below_one() {
        for family in CurveFamily::ALL {
            assert!(transform_y(family, 1.0).is_none());
            assert!(transform_y(family, 0.5).is_none());
            assert!(transform_y(family, f64::NAN).is_none());
            assert!(transform_y(family, 1.2).is_some());
        }
    }

    #[test]
    fn test_manual_r_squared_perfect_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert_abs_diff_eq!(manual_r_squared(&x, &y), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_r_squared_zero_weight_ignored() {
        let obs = [1.5, 1.3, 99.0];
        let fit = [1.5, 1.3, 1.1];
        let w = [1.0, 1.0, 0.0];
        // the mismatched third point carries no weight, so fit is perfect
        assert_abs_diff_eq!(weighted_r_squared(&obs, &fit, &w), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_extrapolate_covers_horizon() {
        let mut fits = CurveFitSet::new();
        fits.insert(
            CurveFamily::Exponential,
            CurveParams { a: 2.0, b: -0.5, c: None },
        );
        let ext = extrapolate(&fits, 10);
        assert_eq!(ext[&CurveFamily::Exponential].len(), 10);
        // factors decay toward 1 from above
        let vals = &ext[&CurveFamily::Exponential];
        assert!(vals.windows(2).all(|w| w[1] < w[0]));
        assert!(vals.iter().all(|&v| v > 1.0));
    }
}
