//! Model evaluation for the logistic and exponential growth curves.
//!
//! The fitter relies on two primitive operations:
//! - predict `y(x)` given parameters (residuals, projections)
//! - fill the jacobian row `∂y/∂p` at `x` (solver steps, covariance)
//!
//! Parameter order:
//! - logistic: `[L, k, x0, b]` for `L / (1 + e^(-k(x - x0))) + b`
//! - exponential: `[N0, r, a]` for `N0 * (1 + r)^(x - a)`
//!
//! Numerical notes:
//! - `e^(-k(x - x0))` overflows for large `k(x0 - x)`, and the naive derivative
//!   `L σ² e` then becomes `inf * 0`. We evaluate the sigmoid in a sign-split
//!   form and use `σ(1 - σ)` for the derivative, both of which stay finite.

use crate::domain::ModelKind;

/// Logistic sigmoid `1 / (1 + e^(-t))`, stable for large `|t|`.
pub fn sigmoid(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

/// Predict `y(x)` for the given model kind.
pub fn predict(model: ModelKind, x: f64, params: &[f64]) -> f64 {
    match model {
        ModelKind::Logistic => {
            let (l, k, x0, b) = (params[0], params[1], params[2], params[3]);
            l * sigmoid(k * (x - x0)) + b
        }
        ModelKind::Exponential => {
            let (n0, r, a) = (params[0], params[1], params[2]);
            n0 * (1.0 + r).powf(x - a)
        }
    }
}

/// Fill the partial derivatives of `y(x)` with respect to each parameter.
///
/// # Panics
/// Panics if `params` or `out` is shorter than `model.param_len()`.
pub fn fill_jacobian_row(model: ModelKind, x: f64, params: &[f64], out: &mut [f64]) {
    match model {
        ModelKind::Logistic => {
            let (l, k, x0) = (params[0], params[1], params[2]);
            let s = sigmoid(k * (x - x0));
            let ds = s * (1.0 - s);
            out[0] = s;
            out[1] = l * ds * (x - x0);
            out[2] = -l * ds * k;
            out[3] = 1.0;
        }
        ModelKind::Exponential => {
            let (n0, r, a) = (params[0], params[1], params[2]);
            let base = 1.0 + r;
            let g = base.powf(x - a);
            out[0] = g;
            out[1] = n0 * (x - a) * base.powf(x - a - 1.0);
            out[2] = -n0 * g * base.ln();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_row(model: ModelKind, x: f64, params: &[f64]) -> Vec<f64> {
        (0..params.len())
            .map(|j| {
                let h = 1e-6 * params[j].abs().max(1.0);
                let mut up = params.to_vec();
                let mut dn = params.to_vec();
                up[j] += h;
                dn[j] -= h;
                (predict(model, x, &up) - predict(model, x, &dn)) / (2.0 * h)
            })
            .collect()
    }

    #[test]
    fn sigmoid_is_finite_at_extremes() {
        assert_eq!(sigmoid(1000.0), 1.0);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn logistic_midpoint_is_half_plus_offset() {
        let y = predict(ModelKind::Logistic, 20.0, &[1000.0, 0.3, 20.0, 4.0]);
        assert!((y - 504.0).abs() < 1e-9);
    }

    #[test]
    fn exponential_at_shift_is_initial_value() {
        let y = predict(ModelKind::Exponential, 5.0, &[12.0, 0.2, 5.0]);
        assert!((y - 12.0).abs() < 1e-12);
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let cases: [(ModelKind, Vec<f64>); 2] = [
            (ModelKind::Logistic, vec![800.0, 0.25, 15.0, 3.0]),
            (ModelKind::Exponential, vec![40.0, 0.15, 4.0]),
        ];
        for (model, params) in cases {
            for &x in &[0.0, 7.0, 15.0, 30.0] {
                let mut analytic = vec![0.0; model.param_len()];
                fill_jacobian_row(model, x, &params, &mut analytic);
                let numeric = numeric_row(model, x, &params);
                for (a, n) in analytic.iter().zip(&numeric) {
                    let tol = 1e-5 * n.abs().max(1.0);
                    assert!((a - n).abs() < tol, "{model:?} x={x}: {a} vs {n}");
                }
            }
        }
    }

    #[test]
    fn logistic_jacobian_stays_finite_far_from_center() {
        let mut row = [0.0; 4];
        fill_jacobian_row(ModelKind::Logistic, 0.0, &[1e9, 10.0, 100.0, 0.0], &mut row);
        assert!(row.iter().all(|v| v.is_finite()));
    }
}
