//! Parameter bounds and starting points for the growth-curve fits.
//!
//! Each model is solved from a small deterministic grid of starting points
//! (data-driven guesses plus the midpoint of the bounds). Local solvers on
//! these curves are sensitive to where they start; a few starts, solved
//! independently, make the result far less dependent on any single guess.

use crate::domain::ModelKind;
use crate::math::{Bounds, linear_regression};

/// Upper bound on the logistic ceiling `L`.
pub const LOGISTIC_MAX_CEILING: f64 = 1e9;
pub const LOGISTIC_MAX_RATE: f64 = 10.0;
/// The inflection point may sit up to 20% past the last observed day.
pub const LOGISTIC_CENTER_SLACK: f64 = 1.2;
pub const LOGISTIC_MAX_OFFSET: f64 = 10.0;

pub const EXPONENTIAL_LOWER: [f64; 3] = [1.0, 0.0, 1.0];
pub const EXPONENTIAL_UPPER: [f64; 3] = [200.0, 1.0, 100.0];

/// Bounds for a model fitted to `y` observed on days `0..y.len()`.
///
/// Returns `None` when the bounds degenerate (e.g. a single observation
/// collapses the `x0` range, or `max(y)` exceeds the ceiling).
pub fn bounds_for(model: ModelKind, y: &[f64]) -> Option<Bounds> {
    match model {
        ModelKind::Logistic => {
            let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let x_last = y.len().checked_sub(1)? as f64;
            Bounds::new(
                vec![y_max, 0.0, 0.0, 0.0],
                vec![
                    LOGISTIC_MAX_CEILING,
                    LOGISTIC_MAX_RATE,
                    LOGISTIC_CENTER_SLACK * x_last,
                    LOGISTIC_MAX_OFFSET,
                ],
            )
        }
        ModelKind::Exponential => Bounds::new(EXPONENTIAL_LOWER.to_vec(), EXPONENTIAL_UPPER.to_vec()),
    }
}

/// Starting points for `model`, each clamped into `bounds`.
pub fn start_grid(model: ModelKind, y: &[f64], bounds: &Bounds) -> Vec<Vec<f64>> {
    let mut grid = match model {
        ModelKind::Logistic => logistic_starts(y),
        ModelKind::Exponential => exponential_starts(y),
    };
    grid.push(bounds.feasible_point());

    for start in &mut grid {
        bounds.clamp(start);
    }
    grid
}

fn logistic_starts(y: &[f64]) -> Vec<Vec<f64>> {
    let Some(x_last) = y.len().checked_sub(1) else {
        return Vec::new();
    };
    let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let offset = y_min.clamp(0.0, LOGISTIC_MAX_OFFSET);
    let half = y_min + 0.5 * (y_max - y_min);
    let x_half = y.iter().position(|&v| v >= half).unwrap_or(x_last) as f64;

    // The steepest daily increase of a logistic curve is L * k / 4.
    let max_step = y.windows(2).map(|w| w[1] - w[0]).fold(0.0, f64::max);
    let rate_for = |ceiling: f64| {
        if ceiling > 0.0 && max_step > 0.0 {
            (4.0 * max_step / ceiling).clamp(0.01, LOGISTIC_MAX_RATE)
        } else {
            0.1
        }
    };

    let saturated = if y_max > 0.0 { y_max * 1.01 } else { 1.0 };
    let growing = 2.0 * y_max.max(1.0);

    vec![
        // Curve already near its plateau: center at the half-way day.
        vec![saturated, rate_for(saturated), x_half, offset],
        // Still accelerating: center at the end of the observed window.
        vec![growing, rate_for(growing), x_last as f64, offset],
    ]
}

fn exponential_starts(y: &[f64]) -> Vec<Vec<f64>> {
    let (xs, logs): (Vec<f64>, Vec<f64>) = y
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0.0)
        .map(|(i, v)| (i as f64, v.ln()))
        .unzip();

    let Some((slope, intercept, _)) = linear_regression(&xs, &logs) else {
        return Vec::new();
    };

    // ln y = intercept + x ln(1 + r), and intercept = ln N0 - a ln(1 + r).
    let rate = (slope.exp() - 1.0).clamp(1e-3, EXPONENTIAL_UPPER[1]);
    let ln_base = rate.ln_1p();

    let mut shift = EXPONENTIAL_LOWER[2];
    let mut initial = (intercept + shift * ln_base).exp();
    if !(EXPONENTIAL_LOWER[0]..=EXPONENTIAL_UPPER[0]).contains(&initial) {
        initial = initial.clamp(EXPONENTIAL_LOWER[0], EXPONENTIAL_UPPER[0]);
        shift = ((initial.ln() - intercept) / ln_base).clamp(EXPONENTIAL_LOWER[2], EXPONENTIAL_UPPER[2]);
    }

    if initial.is_finite() && shift.is_finite() {
        vec![vec![initial, rate, shift]]
    } else {
        Vec::new()
    }
}
