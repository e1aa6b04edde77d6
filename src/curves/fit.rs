//! Curve fitting: closed-form log-linear regression plus nonlinear
//! least-squares refinement
//!
//! Each family is first fitted in its log-linearized space with a weighted
//! linear regression. The nonlinear pass then minimizes the weighted sum of
//! squared residuals in the original factor space with a damped Gauss-Newton
//! iteration seeded from the log-linear result. Non-convergence of a family
//! is not fatal: Exponential, Power and Inverse Power fall back to their
//! log-linear start, while Weibull (which also has shape validity checks)
//! simply drops out of the fitted set.

use nalgebra::{DMatrix, DVector};

use crate::curves::{predict, transform_y, CurveFamily, CurveFitSet, CurveParams};
use crate::error::{ReservingError, Result};

/// Shift constants searched for the Inverse Power family.
const INVERSE_POWER_SHIFTS: [f64; 4] = [-0.5, 1.0, 3.0, 5.0];

const MAX_ITERATIONS: usize = 100;
const STEP_TOLERANCE: f64 = 1e-10;
const COST_TOLERANCE: f64 = 1e-14;

#[derive(Debug, Clone, Copy)]
struct LinFit {
    slope: f64,
    intercept: f64,
}

/// Closed-form weighted simple linear regression over finite `(x, y, w)`
/// triples. None when fewer than two points remain or x is degenerate.
fn weighted_linear_fit(points: &[(f64, f64, f64)]) -> Option<LinFit> {
    let valid: Vec<&(f64, f64, f64)> = points
        .iter()
        .filter(|(x, y, w)| x.is_finite() && y.is_finite() && w.is_finite() && *w > 0.0)
        .collect();
    if valid.len() < 2 {
        return None;
    }
    let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (x, y, w) in valid {
        sw += w;
        swx += w * x;
        swy += w * y;
        swxx += w * x * x;
        swxy += w * x * y;
    }
    let denom = sw * swxx - swx * swx;
    if denom.abs() < 1e-300 {
        return None;
    }
    let slope = (sw * swxy - swx * swy) / denom;
    let intercept = (swy - slope * swx) / sw;
    (slope.is_finite() && intercept.is_finite()).then_some(LinFit { slope, intercept })
}

fn transformed_points(
    family: CurveFamily,
    shift: f64,
    xs: &[f64],
    ys: &[f64],
    weights: Option<&[f64]>,
) -> Vec<(f64, f64, f64)> {
    xs.iter()
        .zip(ys)
        .enumerate()
        .filter_map(|(i, (&x, &y))| {
            let tx = match family {
                CurveFamily::Exponential | CurveFamily::Power => x,
                CurveFamily::Weibull => (x > 0.0).then(|| x.ln())?,
                CurveFamily::InversePower => (x + shift > 0.0).then(|| (x + shift).ln())?,
            };
            let ty = transform_y(family, y)?;
            let w = weights.map(|w| w[i]).unwrap_or(1.0);
            Some((tx, ty, w))
        })
        .collect()
}

fn validate_input(xs: &[f64], ys: &[f64], weights: Option<&[f64]>) -> Result<()> {
    if xs.len() != ys.len() {
        return Err(ReservingError::LengthMismatch {
            name: "ys",
            expected: xs.len(),
            actual: ys.len(),
        });
    }
    if let Some(w) = weights {
        if w.len() != xs.len() {
            return Err(ReservingError::LengthMismatch {
                name: "weights",
                expected: xs.len(),
                actual: w.len(),
            });
        }
    }
    if xs.len() < 3 {
        return Err(ReservingError::InsufficientData(
            "curve fitting needs at least three development factors",
        ));
    }
    Ok(())
}

/// Log-linearized closed-form fit for every family.
///
/// Families whose transform leaves too few valid points are absent from the
/// result. Inverse Power grid-searches the shift constants and keeps the
/// shift with the best transformed-space fit.
pub fn fit_log_linear(xs: &[f64], ys: &[f64], weights: Option<&[f64]>) -> Result<CurveFitSet> {
    validate_input(xs, ys, weights)?;
    let mut fits = CurveFitSet::new();

    for family in [CurveFamily::Exponential, CurveFamily::Weibull, CurveFamily::Power] {
        let points = transformed_points(family, 0.0, xs, ys, weights);
        if let Some(lin) = weighted_linear_fit(&points) {
            let params = match family {
                CurveFamily::Exponential | CurveFamily::Weibull => CurveParams {
                    a: lin.intercept.exp(),
                    b: lin.slope,
                    c: None,
                },
                CurveFamily::Power => CurveParams {
                    a: lin.intercept.exp().exp(),
                    b: lin.slope.exp(),
                    c: None,
                },
                CurveFamily::InversePower => unreachable!(),
            };
            if params.a.is_finite() && params.b.is_finite() {
                fits.insert(family, params);
            }
        }
    }

    // Inverse Power: grid over shift constants, best transformed-space SSE.
    let mut best: Option<(CurveParams, f64)> = None;
    for shift in INVERSE_POWER_SHIFTS {
        let points = transformed_points(CurveFamily::InversePower, shift, xs, ys, weights);
        let Some(lin) = weighted_linear_fit(&points) else {
            continue;
        };
        let sse: f64 = points
            .iter()
            .map(|(tx, ty, w)| w * (ty - (lin.intercept + lin.slope * tx)).powi(2))
            .sum();
        if !sse.is_finite() {
            continue;
        }
        let candidate = CurveParams {
            a: lin.intercept.exp(),
            b: lin.slope,
            c: Some(shift),
        };
        if best.as_ref().is_none_or(|(_, err)| sse < *err) {
            best = Some((candidate, sse));
        }
    }
    if let Some((params, _)) = best {
        fits.insert(CurveFamily::InversePower, params);
    }

    Ok(fits)
}

/// Weighted residual vector in the original factor space, or None when the
/// parameters leave the family's domain or produce non-finite predictions.
fn residuals(
    family: CurveFamily,
    params: &CurveParams,
    xs: &[f64],
    ys: &[f64],
    w_sqrt: &[f64],
) -> Option<DVector<f64>> {
    match family {
        CurveFamily::Weibull | CurveFamily::Power => {
            if params.a <= 0.0 || params.b <= 0.0 {
                return None;
            }
        }
        _ => {}
    }
    let mut out = DVector::zeros(xs.len());
    for (i, (&x, &y)) in xs.iter().zip(ys).enumerate() {
        let pred = predict(family, params, x);
        if !pred.is_finite() {
            return None;
        }
        out[i] = w_sqrt[i] * (y - pred);
    }
    Some(out)
}

/// Damped Gauss-Newton over the `(a, b)` pair; `c` stays fixed.
/// Returns the refined parameters on convergence, None otherwise.
fn gauss_newton(
    family: CurveFamily,
    start: CurveParams,
    xs: &[f64],
    ys: &[f64],
    w_sqrt: &[f64],
) -> Option<CurveParams> {
    let eval = |a: f64, b: f64| {
        residuals(family, &CurveParams { a, b, c: start.c }, xs, ys, w_sqrt)
    };

    let mut p = [start.a, start.b];
    let mut r = eval(p[0], p[1])?;
    let mut cost = r.norm_squared();
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        // finite-difference Jacobian of the residual vector
        let mut jac = DMatrix::zeros(xs.len(), 2);
        for k in 0..2 {
            let eps = 1e-7 * p[k].abs().max(1e-4);
            let mut bumped = p;
            bumped[k] += eps;
            let r_bumped = eval(bumped[0], bumped[1])?;
            for i in 0..xs.len() {
                jac[(i, k)] = (r_bumped[i] - r[i]) / eps;
            }
        }

        let jt = jac.transpose();
        let grad = &jt * &r;
        if grad.norm() < 1e-12 {
            return Some(CurveParams { a: p[0], b: p[1], c: start.c });
        }
        let hess = &jt * &jac;

        // Levenberg damping on the diagonal; grow lambda until a step helps.
        let mut stepped = false;
        for _ in 0..20 {
            let mut damped = hess.clone();
            for k in 0..2 {
                damped[(k, k)] = hess[(k, k)] + lambda * hess[(k, k)].abs().max(1e-12);
            }
            let Some(delta) = damped.lu().solve(&grad) else {
                lambda *= 10.0;
                continue;
            };
            // Gauss-Newton step descends against Jᵀr
            let trial = [p[0] - delta[0], p[1] - delta[1]];
            if let Some(r_trial) = eval(trial[0], trial[1]) {
                let cost_trial = r_trial.norm_squared();
                if cost_trial < cost {
                    let step = delta.norm();
                    p = trial;
                    r = r_trial;
                    let improvement = cost - cost_trial;
                    cost = cost_trial;
                    lambda = (lambda / 10.0).max(1e-12);
                    stepped = true;
                    if step < STEP_TOLERANCE || improvement < COST_TOLERANCE {
                        return Some(CurveParams { a: p[0], b: p[1], c: start.c });
                    }
                    break;
                }
            }
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
        }
        if !stepped {
            // no descent direction left; converged if the fit is already tight
            return (cost < COST_TOLERANCE.max(1e-12 * xs.len() as f64))
                .then_some(CurveParams { a: p[0], b: p[1], c: start.c });
        }
    }
    Some(CurveParams { a: p[0], b: p[1], c: start.c })
}

/// Weibull predictions must stay above 1 and be monotonically
/// non-increasing over the observed indices.
fn weibull_is_valid(params: &CurveParams, xs: &[f64]) -> bool {
    let preds: Vec<f64> = xs
        .iter()
        .map(|&x| predict(CurveFamily::Weibull, params, x))
        .collect();
    if preds.iter().any(|p| !p.is_finite() || *p <= 1.0) {
        return false;
    }
    preds.windows(2).all(|w| w[1] <= w[0])
}

/// Full fitting method: log-linear starts refined by nonlinear least
/// squares, with per-family fallback and validity policies.
pub fn fit_tail_curves(xs: &[f64], ys: &[f64], weights: Option<&[f64]>) -> Result<CurveFitSet> {
    let starts = fit_log_linear(xs, ys, weights)?;
    let w_sqrt: Vec<f64> = match weights {
        Some(w) => w.iter().map(|v| v.max(0.0).sqrt()).collect(),
        None => vec![1.0; xs.len()],
    };

    let mut fits = CurveFitSet::new();

    if let Some(&start) = starts.get(&CurveFamily::Exponential) {
        let refined =
            gauss_newton(CurveFamily::Exponential, start, xs, ys, &w_sqrt).unwrap_or(start);
        fits.insert(CurveFamily::Exponential, refined);
    }

    // Weibull is seeded from the refined Exponential parameters, clamped
    // into its positive domain, and dropped entirely when invalid.
    if let Some(&exp_fit) = fits.get(&CurveFamily::Exponential) {
        let start = CurveParams {
            a: exp_fit.a.max(1e-6),
            b: exp_fit.b.max(1e-6),
            c: None,
        };
        if let Some(refined) = gauss_newton(CurveFamily::Weibull, start, xs, ys, &w_sqrt) {
            if weibull_is_valid(&refined, xs) {
                fits.insert(CurveFamily::Weibull, refined);
            }
        }
    }

    if let Some(&start) = starts.get(&CurveFamily::Power) {
        let refined = gauss_newton(CurveFamily::Power, start, xs, ys, &w_sqrt).unwrap_or(start);
        fits.insert(CurveFamily::Power, refined);
    }

    if let Some(&start) = starts.get(&CurveFamily::InversePower) {
        let mut best: Option<(CurveParams, f64)> = None;
        for shift in INVERSE_POWER_SHIFTS {
            let seeded = CurveParams { c: Some(shift), ..start };
            let Some(refined) =
                gauss_newton(CurveFamily::InversePower, seeded, xs, ys, &w_sqrt)
            else {
                continue;
            };
            let Some(r) = residuals(CurveFamily::InversePower, &refined, xs, ys, &w_sqrt) else {
                continue;
            };
            let cost = r.norm_squared();
            if best.as_ref().is_none_or(|(_, c)| cost < *c) {
                best = Some((refined, cost));
            }
        }
        fits.insert(
            CurveFamily::InversePower,
            best.map(|(p, _)| p).unwrap_or(start),
        );
    }

    Ok(fits)
}
