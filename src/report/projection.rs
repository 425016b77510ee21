//! Derived summaries: logistic projection and batch totals.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::{FitResult, LogisticProjection, ModelKind, RawTable};
use crate::metrics::sanitize;

/// `None` unless `fit` is an Ok logistic fit.
pub fn logistic_projection(fit: &FitResult, start_date: Option<NaiveDate>) -> Option<LogisticProjection> {
    if fit.model != ModelKind::Logistic {
        return None;
    }
    let &[l, k, x0, b] = fit.parameters()? else {
        return None;
    };

    let inflection_date = start_date.and_then(|start| {
        let offset = x0.round();
        if !offset.is_finite() {
            return None;
        }
        let days = Days::new(offset.abs() as u64);
        if offset >= 0.0 {
            start.checked_add_days(days)
        } else {
            start.checked_sub_days(days)
        }
    });

    Some(LogisticProjection {
        final_count: l + b,
        growth_rate: 1.0 + k,
        inflection_date,
    })
}

/// Headline numbers for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    /// Recorded days in the input tables.
    pub days: usize,
    /// Sum of every input row's latest confirmed count.
    pub total_confirmed: i64,
}

/// Totals over the raw confirmed rows.
///
/// Each input row counts once, so parent copies of localities and
/// synthesized aggregates never inflate the sum.
pub fn batch_totals(confirmed: &RawTable) -> BatchTotals {
    let total_confirmed = confirmed
        .rows
        .iter()
        .filter_map(|row| sanitize(&row.values).values.last().copied())
        .sum();
    BatchTotals {
        days: confirmed.days(),
        total_confirmed,
    }
}
