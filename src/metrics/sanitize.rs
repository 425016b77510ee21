//! Trailing reporting-gap removal.
//!
//! A region that stops reporting shows up as a run of zeros at the end of its
//! cumulative series. That run is trimmed and counted as stale days. A series
//! that is zero everywhere is a region with no activity yet, not a stale one,
//! and is returned untouched.

use crate::domain::SanitizedSeries;

pub fn sanitize(series: &[i64]) -> SanitizedSeries {
    let kept = series
        .iter()
        .rposition(|&v| v != 0)
        .map_or(0, |last| last + 1);

    if kept == 0 {
        return SanitizedSeries {
            values: series.to_vec(),
            stale_days: 0,
        };
    }

    SanitizedSeries {
        values: series[..kept].to_vec(),
        stale_days: series.len() - kept,
    }
}
