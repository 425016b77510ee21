//! Simple trend summaries: log-linear growth and case fatality rate.

use crate::domain::LogLinearTrend;
use crate::math::linear_regression;

/// Counts at or below this are ignored by the log-linear trend.
pub const DEFAULT_TREND_MINIMUM: i64 = 10;

/// OLS fit of `ln(count)` against day index, over counts strictly above
/// `minimum`. Days keep their position in the original series.
///
/// Returns `None` with fewer than three qualifying days.
pub fn log_linear_trend(series: &[i64], minimum: i64) -> Option<LogLinearTrend> {
    let floor = minimum.max(0);
    let (x, y): (Vec<f64>, Vec<f64>) = series
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > floor)
        .map(|(i, v)| (i as f64, (*v as f64).ln()))
        .unzip();

    if x.len() < 3 {
        return None;
    }

    let (slope, intercept, r_squared) = linear_regression(&x, &y)?;
    Some(LogLinearTrend {
        slope,
        intercept,
        r_squared,
        growth: 1.0 + slope,
        points_used: x.len(),
    })
}

/// Latest deaths over latest confirmed; `None` when nothing is confirmed.
pub fn case_fatality_rate(confirmed: &[i64], deaths: &[i64]) -> Option<f64> {
    let confirmed = *confirmed.last()?;
    let deaths = deaths.last().copied().unwrap_or(0);
    if confirmed <= 0 {
        return None;
    }
    Some(deaths as f64 / confirmed as f64)
}
