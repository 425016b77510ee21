//! Growth-curve fitting for a single region's confirmed-case series.
//!
//! Given cumulative counts `y_i` on days `x_i = i`, we fit each model by bounded
//! nonlinear least squares:
//! - solve from every point of the start grid (parallel)
//! - keep the lowest-SSE solution (ties broken by grid index)
//! - derive the parameter covariance from its jacobian (the exponential's
//!   through the pseudo-inverse)
//!
//! Any failure (too few points, degenerate bounds, non-finite evaluation,
//! non-convergence, singular jacobian) yields a `Failed` result for that model
//! only. Nothing here returns an error to the caller.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::domain::{FitFailure, FitResult, FitStatus, ModelKind};
use crate::fit::start_grid::{bounds_for, start_grid};
use crate::math::{LeastSquaresProblem, Solution, SolverOptions, minimize};
use crate::models::{fill_jacobian_row, predict};

/// Least-squares view of one model over one series.
struct CurveProblem<'a> {
    model: ModelKind,
    y: &'a [f64],
}

impl LeastSquaresProblem for CurveProblem<'_> {
    fn residual_count(&self) -> usize {
        self.y.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        for (i, (r, &y)) in out.iter_mut().zip(self.y).enumerate() {
            *r = predict(self.model, i as f64, params) - y;
        }
    }

    fn jacobian(&self, params: &[f64], jac: &mut DMatrix<f64>) {
        let mut row = vec![0.0; self.model.param_len()];
        for i in 0..self.y.len() {
            fill_jacobian_row(self.model, i as f64, params, &mut row);
            for (j, v) in row.iter().enumerate() {
                jac[(i, j)] = *v;
            }
        }
    }
}

/// Logistic and exponential fits of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendFits {
    pub logistic: FitResult,
    pub exponential: FitResult,
}

/// Fit both growth models to `series`.
pub fn fit_trends(series: &[i64], opts: &SolverOptions) -> TrendFits {
    let y: Vec<f64> = series.iter().map(|&v| v as f64).collect();
    TrendFits {
        logistic: fit_curve(ModelKind::Logistic, &y, opts),
        exponential: fit_curve(ModelKind::Exponential, &y, opts),
    }
}

/// Fit one model to `y` observed on days `0..y.len()`.
pub fn fit_curve(model: ModelKind, y: &[f64], opts: &SolverOptions) -> FitResult {
    let params = model.param_len();
    if y.len() <= params {
        return FitResult::failed(
            model,
            FitFailure::Underdetermined {
                points: y.len(),
                params,
            },
        );
    }
    if y.iter().any(|v| !v.is_finite()) {
        return FitResult::failed(model, FitFailure::NonFinite);
    }
    let Some(bounds) = bounds_for(model, y) else {
        return FitResult::failed(model, FitFailure::InvalidBounds);
    };

    let problem = CurveProblem { model, y };
    let grid = start_grid(model, y, &bounds);

    // Evaluate each start independently (parallel); results keep grid order.
    let outcomes: Vec<Result<Solution, FitFailure>> = grid
        .par_iter()
        .map(|start| minimize(&problem, start, &bounds, opts))
        .collect();

    let best = match select_best(outcomes) {
        Ok(best) => best,
        Err(reason) => return FitResult::failed(model, reason),
    };

    if best.params.iter().any(|v| !v.is_finite()) {
        return FitResult::failed(model, FitFailure::NonFinite);
    }

    // N0 and a of the exponential trade off exactly; the logistic has no such
    // pair, so a rank-deficient logistic jacobian is a failed fit.
    let covariance = match model {
        ModelKind::Logistic => best.covariance(),
        ModelKind::Exponential => best.pseudo_covariance(),
    };
    match covariance {
        Ok(covariance) => FitResult {
            model,
            status: FitStatus::Ok {
                parameters: best.params,
                covariance,
            },
        },
        Err(reason) => FitResult::failed(model, reason),
    }
}

/// Minimum SSE wins; ties go to the earlier start. With no success at all,
/// the first start's failure is reported.
fn select_best(outcomes: Vec<Result<Solution, FitFailure>>) -> Result<Solution, FitFailure> {
    let mut best: Option<Solution> = None;
    let mut first_failure = None;

    for outcome in outcomes {
        match outcome {
            Ok(sol) => {
                if best.as_ref().is_none_or(|b| sol.sse < b.sse) {
                    best = Some(sol);
                }
            }
            Err(reason) => {
                first_failure.get_or_insert(reason);
            }
        }
    }

    best.ok_or(first_failure.unwrap_or(FitFailure::NoProgress))
}
