//! Region record assembly.
//!
//! Pure composition of already computed stage outputs into one `RegionPoint`.
//! Nothing is recomputed here, so assembling twice from the same inputs yields
//! identical records.

use chrono::NaiveDate;

use crate::domain::{LogLinearTrend, LogisticProjection, ReferenceData, RegionPoint, RegionSeries, SanitizedSeries};
use crate::fit::TrendFits;

/// Everything the analysis stages produced for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAnalysis {
    pub confirmed: SanitizedSeries,
    pub recovered: SanitizedSeries,
    pub deaths: SanitizedSeries,
    /// Growth factors of the sanitized confirmed series.
    pub growth: Vec<f64>,
    pub fits: TrendFits,
    /// Outlook implied by an Ok logistic fit.
    pub projection: Option<LogisticProjection>,
    pub log_trend: Option<LogLinearTrend>,
    pub case_fatality_rate: Option<f64>,
}

/// Build the rendering record for one region.
///
/// Population and age samples are looked up by region name; a miss yields the
/// unknown sentinel or `None`.
pub fn assemble_point(
    series: &RegionSeries,
    analysis: &RegionAnalysis,
    reference: &ReferenceData,
    start_date: Option<NaiveDate>,
) -> RegionPoint {
    RegionPoint {
        name: series.name.clone(),
        lat: series.lat,
        lon: series.lon,
        population: reference.population(&series.name),
        start_date,
        confirmed: analysis.confirmed.values.clone(),
        recovered: analysis.recovered.values.clone(),
        deaths: analysis.deaths.values.clone(),
        stale_days: analysis.confirmed.stale_days,
        growth: analysis.growth.clone(),
        logistic: analysis.fits.logistic.clone(),
        exponential: analysis.fits.exponential.clone(),
        projection: analysis.projection,
        log_trend: analysis.log_trend,
        case_fatality_rate: analysis.case_fatality_rate,
        age_samples: reference.age_samples.get(&series.name).cloned(),
        death_age_samples: reference.death_age_samples.get(&series.name).cloned(),
    }
}
