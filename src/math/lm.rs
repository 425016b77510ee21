//! Bounded nonlinear least squares (Levenberg–Marquardt).
//!
//! Minimizes `Σ r_i(p)^2` subject to `lower <= p <= upper`.
//!
//! Implementation choices:
//! - Columns of the jacobian are scaled to unit norm before each step, so
//!   parameters living on very different scales (e.g. a population of 1e9 next
//!   to a rate of 1e-10) share one damping level.
//! - The damped step solves `[J_s; sqrt(λ) I] z = [-r; 0]` with SVD least
//!   squares rather than forming `JᵀJ`.
//! - Bounds are handled by projection: trial points are clamped, and a
//!   parameter sitting on a bound whose gradient pushes outward is frozen for
//!   that iteration.
//! - Convergence on relative SSE reduction (`ftol`), step size (`xtol`), or the
//!   projected scaled gradient (`gtol`). Running out of iterations is a failure.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::FitFailure;
use crate::math::ols::solve_least_squares;

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// A residual vector and its jacobian as functions of the parameters.
pub trait LeastSquaresProblem {
    fn residual_count(&self) -> usize;

    /// Fill `out` with `model(params) - observed`.
    fn residuals(&self, params: &[f64], out: &mut [f64]);

    /// Fill `jac[(i, j)]` with `∂r_i / ∂p_j`.
    fn jacobian(&self, params: &[f64], jac: &mut DMatrix<f64>);
}

/// Box constraints. Every lower bound is strictly below its upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    /// Returns `None` unless both sides have equal length and `lower < upper`
    /// holds element-wise.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Option<Self> {
        if lower.len() != upper.len() {
            return None;
        }
        let ordered = lower
            .iter()
            .zip(&upper)
            .all(|(lo, hi)| !lo.is_nan() && !hi.is_nan() && lo < hi);
        ordered.then_some(Self { lower, upper })
    }

    pub fn lower_only(lower: Vec<f64>) -> Option<Self> {
        let upper = vec![f64::INFINITY; lower.len()];
        Self::new(lower, upper)
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn clamp(&self, params: &mut [f64]) {
        for ((p, &lo), &hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            *p = p.clamp(lo, hi);
        }
    }

    /// A strictly feasible starting point: the midpoint of finite bounds, one
    /// unit inside a single finite bound, zero when unbounded.
    pub fn feasible_point(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(&lo, &hi)| match (lo.is_finite(), hi.is_finite()) {
                (true, true) => 0.5 * (lo + hi),
                (true, false) => lo + 1.0,
                (false, true) => hi - 1.0,
                (false, false) => 0.0,
            })
            .collect()
    }
}

/// Solver tolerances and iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

/// A converged solution.
#[derive(Debug, Clone)]
pub struct Solution {
    pub params: Vec<f64>,
    pub sse: f64,
    /// Jacobian of the residuals at `params`.
    pub jacobian: DMatrix<f64>,
    pub iterations: usize,
}

impl Solution {
    /// Parameter covariance `(JᵀJ)⁻¹ * SSE / (m - n)` of an identifiable fit.
    ///
    /// Any singular value at or below `sqrt(eps) * s_max` makes the jacobian
    /// singular; flat data fitted by a sigmoid lands here.
    pub fn covariance(&self) -> Result<Vec<Vec<f64>>, FitFailure> {
        self.scaled_inverse(f64::EPSILON.sqrt(), true)
    }

    /// Like [`Solution::covariance`], but through the pseudo-inverse: singular
    /// values below `eps * max(m, n) * s_max` are dropped instead of failing.
    /// Only a rank-zero jacobian is singular.
    ///
    /// For models with a structural parameter trade-off.
    pub fn pseudo_covariance(&self) -> Result<Vec<Vec<f64>>, FitFailure> {
        let (m, n) = self.jacobian.shape();
        self.scaled_inverse(f64::EPSILON * m.max(n) as f64, false)
    }

    fn scaled_inverse(&self, relative_cutoff: f64, full_rank: bool) -> Result<Vec<Vec<f64>>, FitFailure> {
        let (m, n) = self.jacobian.shape();
        if m <= n {
            return Err(FitFailure::Underdetermined {
                points: m,
                params: n,
            });
        }

        let svd = self.jacobian.clone().svd(false, true);
        let v_t = svd.v_t.as_ref().ok_or(FitFailure::SingularJacobian)?;
        let singular = &svd.singular_values;
        let cutoff = relative_cutoff * singular.max();

        let mut cov = DMatrix::<f64>::zeros(n, n);
        let mut rank = 0usize;
        for k in 0..singular.len() {
            let s = singular[k];
            if s > cutoff && s > 0.0 {
                rank += 1;
                let row = v_t.row(k);
                cov += row.transpose() * row / (s * s);
            }
        }
        if rank == 0 || (full_rank && rank < n) {
            return Err(FitFailure::SingularJacobian);
        }

        cov *= self.sse / (m - n) as f64;
        if cov.iter().any(|v| !v.is_finite()) {
            return Err(FitFailure::SingularJacobian);
        }

        Ok((0..n)
            .map(|i| (0..n).map(|j| cov[(i, j)]).collect())
            .collect())
    }
}

/// Minimize the problem's SSE inside `bounds`, starting from `start`
/// (clamped into the box first).
pub fn minimize<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    start: &[f64],
    bounds: &Bounds,
    opts: &SolverOptions,
) -> Result<Solution, FitFailure> {
    let n = bounds.len();
    let m = problem.residual_count();
    if start.len() != n {
        return Err(FitFailure::InvalidBounds);
    }
    if m <= n {
        return Err(FitFailure::Underdetermined {
            points: m,
            params: n,
        });
    }

    let mut params = start.to_vec();
    bounds.clamp(&mut params);

    let mut residuals = vec![0.0; m];
    problem.residuals(&params, &mut residuals);
    let mut sse = sum_sq(&residuals);
    if !sse.is_finite() {
        return Err(FitFailure::NonFinite);
    }

    let mut jac = DMatrix::<f64>::zeros(m, n);
    let mut trial = vec![0.0; n];
    let mut trial_residuals = vec![0.0; m];
    let mut lambda = INITIAL_DAMPING;

    for iteration in 0..opts.max_iterations {
        problem.jacobian(&params, &mut jac);
        if jac.iter().any(|v| !v.is_finite()) {
            return Err(FitFailure::NonFinite);
        }

        if sse == 0.0 {
            return Ok(finish(params, sse, jac, iteration));
        }

        let gradient = jac.tr_mul(&DVector::from_column_slice(&residuals));
        let scale: Vec<f64> = (0..n)
            .map(|j| {
                let s = jac.column(j).norm();
                if s > 0.0 && s.is_finite() { s } else { 1.0 }
            })
            .collect();
        let free: Vec<bool> = (0..n)
            .map(|j| is_free(params[j], gradient[j], bounds.lower[j], bounds.upper[j]))
            .collect();

        let r_norm = sse.sqrt();
        let scaled_gradient = (0..n)
            .filter(|&j| free[j])
            .map(|j| gradient[j].abs() / (scale[j] * r_norm))
            .fold(0.0, f64::max);
        if scaled_gradient <= opts.gtol {
            return Ok(finish(params, sse, jac, iteration));
        }

        let mut accepted = false;
        while lambda <= MAX_DAMPING {
            let Some(step) = damped_step(&jac, &residuals, &scale, &free, lambda) else {
                lambda *= 10.0;
                continue;
            };

            for j in 0..n {
                trial[j] = params[j] + step[j];
            }
            bounds.clamp(&mut trial);

            let small_step = (0..n)
                .all(|j| (trial[j] - params[j]).abs() <= opts.xtol * (opts.xtol + params[j].abs()));

            problem.residuals(&trial, &mut trial_residuals);
            let trial_sse = sum_sq(&trial_residuals);

            if trial_sse.is_finite() && trial_sse < sse {
                let reduction = sse - trial_sse;
                let previous = sse;
                params.copy_from_slice(&trial);
                residuals.copy_from_slice(&trial_residuals);
                sse = trial_sse;
                lambda = (lambda / 10.0).max(MIN_DAMPING);

                if reduction <= opts.ftol * previous || small_step {
                    problem.jacobian(&params, &mut jac);
                    if jac.iter().any(|v| !v.is_finite()) {
                        return Err(FitFailure::NonFinite);
                    }
                    return Ok(finish(params, sse, jac, iteration + 1));
                }
                accepted = true;
                break;
            }

            // No decrease, and the step has shrunk to nothing: this is a minimum.
            if small_step {
                return Ok(finish(params, sse, jac, iteration));
            }
            lambda *= 10.0;
        }

        if !accepted {
            return Err(FitFailure::NoProgress);
        }
    }

    Err(FitFailure::NotConverged {
        iterations: opts.max_iterations,
    })
}

fn finish(params: Vec<f64>, sse: f64, jacobian: DMatrix<f64>, iterations: usize) -> Solution {
    Solution {
        params,
        sse,
        jacobian,
        iterations,
    }
}

fn is_free(p: f64, gradient: f64, lower: f64, upper: f64) -> bool {
    // A descent step moves along -gradient.
    !((p <= lower && gradient > 0.0) || (p >= upper && gradient < 0.0))
}

fn damped_step(
    jac: &DMatrix<f64>,
    residuals: &[f64],
    scale: &[f64],
    free: &[bool],
    lambda: f64,
) -> Option<Vec<f64>> {
    let (m, n) = jac.shape();
    let damping = lambda.sqrt();

    let mut a = DMatrix::<f64>::zeros(m + n, n);
    let mut rhs = DVector::<f64>::zeros(m + n);
    for j in 0..n {
        if free[j] {
            for i in 0..m {
                a[(i, j)] = jac[(i, j)] / scale[j];
            }
            a[(m + j, j)] = damping;
        } else {
            a[(m + j, j)] = 1.0;
        }
    }
    for i in 0..m {
        rhs[i] = -residuals[i];
    }

    let z = solve_least_squares(&a, &rhs)?;
    Some(
        (0..n)
            .map(|j| if free[j] { z[j] / scale[j] } else { 0.0 })
            .collect(),
    )
}

fn sum_sq(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}
