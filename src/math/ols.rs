//! Linear least squares via SVD.
//!
//! Used in two places:
//! - the damped step of the bounded Levenberg–Marquardt solver, which solves an
//!   augmented system `[J; sqrt(λ) I] δ = [-r; 0]` instead of the normal
//!   equations (better conditioned when parameter scales differ by many orders)
//! - the log-linear trend regression
//!
//! Nalgebra's `QR::solve` is intended for square systems and panics on tall
//! ones, so SVD is used for every shape.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Simple linear regression `y = intercept + slope * x`.
///
/// Returns `(slope, intercept, r_squared)`, or `None` with fewer than two points
/// or a degenerate design.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<(f64, f64, f64)> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }

    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
    let obs = DVector::from_column_slice(&y[..n]);
    let beta = solve_least_squares(&design, &obs)?;
    let (intercept, slope) = (beta[0], beta[1]);

    let mean = obs.mean();
    let ss_tot: f64 = obs.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res: f64 = (0..n)
        .map(|i| (y[i] - intercept - slope * x[i]).powi(2))
        .sum();
    // A flat series is perfectly explained by its mean.
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    Some((slope, intercept, r_squared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn regression_reports_perfect_fit() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let (slope, intercept, r2) = linear_regression(&x, &y).unwrap();
        assert!((slope - 2.0).abs() < 1e-10);
        assert!((intercept - 1.0).abs() < 1e-10);
        assert!((r2 - 1.0).abs() < 1e-10);
    }

    #[test]
    fn regression_needs_two_points() {
        assert!(linear_regression(&[1.0], &[2.0]).is_none());
    }
}
