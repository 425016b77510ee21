//! The in-memory analysis pipeline.
//!
//! raw tables -> aggregation -> per-region (sanitize -> growth -> fits ->
//! trend) -> assembled records -> batch totals
//!
//! Regions share nothing mutable, so per-region analysis runs on the rayon
//! pool when `PipelineConfig::parallel` is set. Results land in a `BTreeMap`,
//! so the output does not depend on scheduling.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::aggregate::RegionAggregator;
use crate::domain::{PipelineConfig, RawTables, ReferenceData, RegionPoint, RegionSeries};
use crate::error::Result;
use crate::fit::fit_trends;
use crate::metrics::{case_fatality_rate, growth_factor, log_linear_trend, sanitize};
use crate::report::{BatchTotals, RegionAnalysis, assemble_point, batch_totals, logistic_projection};

/// All computed outputs of one run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub regions: BTreeMap<String, RegionSeries>,
    pub points: BTreeMap<String, RegionPoint>,
    pub totals: BatchTotals,
}

/// Run every stage over already-loaded tables.
pub fn run_pipeline(tables: &RawTables, config: &PipelineConfig, reference: &ReferenceData) -> Result<PipelineOutput> {
    config.validate()?;

    let regions = RegionAggregator::new(config).aggregate(tables)?;
    let start_date = tables.start_date();

    let assemble = |series: &RegionSeries| {
        let analysis = analyze_region(series, config, start_date);
        (series.name.clone(), assemble_point(series, &analysis, reference, start_date))
    };
    let points: BTreeMap<String, RegionPoint> = if config.parallel {
        regions.par_iter().map(|(_, series)| assemble(series)).collect()
    } else {
        regions.values().map(assemble).collect()
    };

    let fitted = points
        .values()
        .filter(|p| p.logistic.is_ok() || p.exponential.is_ok())
        .count();
    log::info!("analyzed {} regions ({fitted} with at least one fit)", points.len());

    let totals = batch_totals(&tables.confirmed);
    Ok(PipelineOutput {
        regions,
        points,
        totals,
    })
}

/// Sanitize, derive and fit one region's series.
pub fn analyze_region(series: &RegionSeries, config: &PipelineConfig, start_date: Option<NaiveDate>) -> RegionAnalysis {
    let confirmed = sanitize(&series.confirmed);
    let recovered = sanitize(&series.recovered);
    let deaths = sanitize(&series.deaths);

    let growth = growth_factor(&confirmed.values);
    let fits = fit_trends(&confirmed.values, &config.solver);
    for fit in [&fits.logistic, &fits.exponential] {
        if let crate::domain::FitStatus::Failed { reason } = &fit.status {
            log::debug!("{} fit failed for `{}`: {reason}", fit.model.display_name(), series.name);
        }
    }

    RegionAnalysis {
        projection: logistic_projection(&fits.logistic, start_date),
        log_trend: log_linear_trend(&confirmed.values, config.trend_minimum),
        case_fatality_rate: case_fatality_rate(&confirmed.values, &deaths.values),
        confirmed,
        recovered,
        deaths,
        growth,
        fits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AggregateRegion, MeasureKind, Population, RawRow, RawTable};
    use crate::models::predict;

    fn table(kind: MeasureKind, rows: Vec<RawRow>, days: usize) -> RawTable {
        let start = NaiveDate::from_ymd_opt(2020, 1, 22).unwrap();
        RawTable {
            kind,
            dates: (0..days as u64).map(|d| start + chrono::Days::new(d)).collect(),
            rows,
        }
    }

    fn row(sub: Option<&str>, country: &str, lat: f64, lon: f64, values: Vec<i64>) -> RawRow {
        RawRow {
            sub_region: sub.map(str::to_string),
            country: country.to_string(),
            lat,
            lon,
            values,
        }
    }

    fn fixture() -> (RawTables, PipelineConfig, ReferenceData) {
        let days = 41;
        let logistic: Vec<i64> = (0..days)
            .map(|x| predict(crate::domain::ModelKind::Logistic, x as f64, &[1000.0, 0.3, 20.0, 0.0]).round() as i64)
            .collect();

        let confirmed = vec![
            row(None, "Italy", 41.87, 12.56, logistic),
            row(Some("Washington"), "US", 47.4, -121.5, vec![10; days]),
            row(Some("King County, WA"), "US", 47.6, -122.3, vec![1; days]),
        ];
        let deaths = vec![row(None, "Italy", 41.87, 12.56, vec![0; days])];

        let tables = RawTables::new(
            table(MeasureKind::Confirmed, confirmed, days),
            table(MeasureKind::Recovered, vec![], days),
            table(MeasureKind::Deaths, deaths, days),
        )
        .unwrap();

        let mut config = PipelineConfig::default();
        config
            .sub_regions
            .codes
            .insert("WA".to_string(), "Washington".to_string());
        config.aggregates.push(AggregateRegion {
            name: "World".to_string(),
            lat: 0.0,
            lon: 0.0,
            include: vec![],
            exclude: vec![],
        });

        let mut reference = ReferenceData::default();
        reference
            .populations
            .insert("Italy".to_string(), Population::Known(60_461_826));

        (tables, config, reference)
    }

    #[test]
    fn end_to_end_batch() {
        let (tables, config, reference) = fixture();
        let out = run_pipeline(&tables, &config, &reference).unwrap();

        assert_eq!(
            out.points.keys().cloned().collect::<Vec<_>>(),
            vec!["Italy", "King County, WA", "Washington", "World"]
        );

        let italy = &out.points["Italy"];
        assert_eq!(italy.population, Population::Known(60_461_826));
        assert_eq!(italy.start_date, NaiveDate::from_ymd_opt(2020, 1, 22));
        assert_eq!(italy.growth.len(), 39);
        let p = italy.logistic.parameters().expect("logistic fit");
        assert!((p[0] - 1000.0).abs() / 1000.0 < 0.02, "L={}", p[0]);
        assert_eq!(italy.case_fatality_rate, Some(0.0));
        let outlook = italy.projection.expect("logistic projection");
        assert!((outlook.final_count - p[0] - p[3]).abs() < 1e-9);
        assert!(outlook.inflection_date.is_some());

        // The parent total includes its locality, which is also kept on its own.
        let wa = &out.points["Washington"];
        assert_eq!(wa.confirmed, vec![11; 41]);
        assert_eq!(wa.population, Population::Unknown);
        assert_eq!(out.points["King County, WA"].confirmed, vec![1; 41]);

        assert_eq!(out.totals.days, 41);
        // Counted once from the raw rows, not again through the parent copy.
        let expected_total = *italy.confirmed.last().unwrap() + 10 + 1;
        assert_eq!(out.totals.total_confirmed, expected_total);
        assert_eq!(out.regions["World"].kind, crate::domain::RegionKind::Aggregate);
    }

    #[test]
    fn sequential_and_parallel_runs_agree() {
        let (tables, mut config, reference) = fixture();
        let parallel = run_pipeline(&tables, &config, &reference).unwrap();
        config.parallel = false;
        let sequential = run_pipeline(&tables, &config, &reference).unwrap();

        assert_eq!(parallel.points, sequential.points);
        assert_eq!(
            serde_json::to_string(&parallel.points).unwrap(),
            serde_json::to_string(&sequential.points).unwrap()
        );
    }

    #[test]
    fn stale_region_reports_gap() {
        let series = RegionSeries {
            name: "Atlantis".to_string(),
            country: "Atlantis".to_string(),
            kind: crate::domain::RegionKind::Reported,
            lat: 0.0,
            lon: 0.0,
            confirmed: vec![5, 6, 7, 0, 0],
            recovered: vec![0; 5],
            deaths: vec![0; 5],
        };
        let analysis = analyze_region(&series, &PipelineConfig::default(), None);
        assert_eq!(analysis.confirmed.values, vec![5, 6, 7]);
        assert_eq!(analysis.confirmed.stale_days, 2);
        assert_eq!(analysis.growth, vec![1.0]);
        assert!(!analysis.fits.logistic.is_ok());
        assert_eq!(analysis.projection, None);
        assert_eq!(analysis.recovered.values, vec![0; 5]);
    }

    #[test]
    fn invalid_config_aborts() {
        let (tables, mut config, reference) = fixture();
        config.solver.max_iterations = 0;
        assert!(run_pipeline(&tables, &config, &reference).is_err());
    }
}
