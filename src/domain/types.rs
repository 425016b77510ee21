//! Shared domain types.
//!
//! These are plain value records passed from stage to stage:
//!
//! - raw tabular input (`RawRow`, `RawTable`)
//! - per-region cumulative series (`RegionSeries`, `SanitizedSeries`)
//! - fit outputs (`FitResult`, `FitStatus`)
//! - the assembled per-region record handed to rendering (`RegionPoint`)

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Which cumulative count a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    Confirmed,
    Recovered,
    Deaths,
}

impl MeasureKind {
    pub const ALL: [MeasureKind; 3] = [
        MeasureKind::Confirmed,
        MeasureKind::Recovered,
        MeasureKind::Deaths,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MeasureKind::Confirmed => "confirmed",
            MeasureKind::Recovered => "recovered",
            MeasureKind::Deaths => "deaths",
        }
    }
}

impl fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a measurement table.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// `Province/State`, when the row is below country level.
    pub sub_region: Option<String>,
    /// `Country/Region`.
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    /// Cumulative counts, one per date column.
    pub values: Vec<i64>,
}

impl RawRow {
    /// Sub-region label when present, else the country name.
    pub fn display_name(&self) -> &str {
        self.sub_region.as_deref().unwrap_or(&self.country)
    }
}

/// A full measurement table: shared date axis plus rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub kind: MeasureKind,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn days(&self) -> usize {
        self.dates.len()
    }
}

/// The three measurement tables of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTables {
    pub confirmed: RawTable,
    pub recovered: RawTable,
    pub deaths: RawTable,
}

impl RawTables {
    /// Bundle three tables that share one date axis.
    pub fn new(confirmed: RawTable, recovered: RawTable, deaths: RawTable) -> crate::error::Result<Self> {
        for table in [&recovered, &deaths] {
            if table.days() != confirmed.days() {
                return Err(crate::error::Error::LengthMismatch {
                    context: format!("{} table date columns", table.kind),
                    expected: confirmed.days(),
                    found: table.days(),
                });
            }
        }
        Ok(Self {
            confirmed,
            recovered,
            deaths,
        })
    }

    pub fn get(&self, kind: MeasureKind) -> &RawTable {
        match kind {
            MeasureKind::Confirmed => &self.confirmed,
            MeasureKind::Recovered => &self.recovered,
            MeasureKind::Deaths => &self.deaths,
        }
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.confirmed.dates.first().copied()
    }
}

/// Whether a region came from the input or was synthesized by summing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Reported,
    Aggregate,
}

/// Cumulative series for one region, all three measurements on one date axis.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSeries {
    pub name: String,
    pub country: String,
    pub kind: RegionKind,
    pub lat: f64,
    pub lon: f64,
    pub confirmed: Vec<i64>,
    pub recovered: Vec<i64>,
    pub deaths: Vec<i64>,
}

impl RegionSeries {
    pub fn days(&self) -> usize {
        self.confirmed.len()
    }

    pub fn series(&self, kind: MeasureKind) -> &[i64] {
        match kind {
            MeasureKind::Confirmed => &self.confirmed,
            MeasureKind::Recovered => &self.recovered,
            MeasureKind::Deaths => &self.deaths,
        }
    }
}

/// A cumulative series with its trailing reporting gap removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedSeries {
    pub values: Vec<i64>,
    /// Number of trailing zero days that were trimmed.
    pub stale_days: usize,
}

/// Parametric growth model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// `L / (1 + e^(-k(x - x0))) + b`
    Logistic,
    /// `N0 * (1 + r)^(x - a)`
    Exponential,
}

impl ModelKind {
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic",
            ModelKind::Exponential => "exponential",
        }
    }

    pub fn param_len(self) -> usize {
        match self {
            ModelKind::Logistic => 4,
            ModelKind::Exponential => 3,
        }
    }
}

/// Why a fit produced no parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FitFailure {
    /// Not strictly more observations than parameters.
    Underdetermined { points: usize, params: usize },
    /// Some lower bound is not strictly below its upper bound.
    InvalidBounds,
    /// The model or its jacobian evaluated to NaN/Inf.
    NonFinite,
    NotConverged { iterations: usize },
    /// No damping level produced a cost decrease.
    NoProgress,
    SingularJacobian,
}

impl fmt::Display for FitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitFailure::Underdetermined { points, params } => {
                write!(f, "underdetermined: {points} points for {params} parameters")
            }
            FitFailure::InvalidBounds => f.write_str("invalid parameter bounds"),
            FitFailure::NonFinite => f.write_str("non-finite model evaluation"),
            FitFailure::NotConverged { iterations } => {
                write!(f, "not converged after {iterations} iterations")
            }
            FitFailure::NoProgress => f.write_str("no cost decrease at any damping level"),
            FitFailure::SingularJacobian => f.write_str("singular jacobian"),
        }
    }
}

/// Outcome of one fit attempt. Failed fits carry no partial parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum FitStatus {
    Ok {
        parameters: Vec<f64>,
        covariance: Vec<Vec<f64>>,
    },
    Failed {
        reason: FitFailure,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    #[serde(flatten)]
    pub status: FitStatus,
}

impl FitResult {
    pub fn failed(model: ModelKind, reason: FitFailure) -> Self {
        Self {
            model,
            status: FitStatus::Failed { reason },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, FitStatus::Ok { .. })
    }

    pub fn parameters(&self) -> Option<&[f64]> {
        match &self.status {
            FitStatus::Ok { parameters, .. } => Some(parameters),
            FitStatus::Failed { .. } => None,
        }
    }
}

/// Region population from the lookup table.
///
/// Serialized as a number, or as the string `"unknown"` on a lookup miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Population {
    Known(u64),
    #[default]
    Unknown,
}

impl Population {
    pub const UNKNOWN_LABEL: &'static str = "unknown";

    /// Parse a population cell such as `"1,234,567"` or `"83 783 942"`.
    pub fn parse(text: &str) -> Self {
        let digits: String = text
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | '_' | ' ' | '\u{a0}'))
            .collect();
        match digits.parse::<u64>() {
            Ok(n) => Population::Known(n),
            Err(_) => match digits.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => Population::Known(v.round() as u64),
                _ => Population::Unknown,
            },
        }
    }

    pub fn known(self) -> Option<u64> {
        match self {
            Population::Known(n) => Some(n),
            Population::Unknown => None,
        }
    }
}

impl Serialize for Population {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Population::Known(n) => serializer.serialize_u64(*n),
            Population::Unknown => serializer.serialize_str(Self::UNKNOWN_LABEL),
        }
    }
}

impl<'de> Deserialize<'de> for Population {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Float(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Population::Known(n),
            Raw::Float(v) if v.is_finite() && v >= 0.0 => Population::Known(v.round() as u64),
            Raw::Float(_) => Population::Unknown,
            Raw::Text(s) => {
                let parsed = Population::parse(&s);
                if parsed == Population::Unknown && !s.eq_ignore_ascii_case(Self::UNKNOWN_LABEL) {
                    log::warn!("unparseable population value `{s}`, treating as unknown");
                }
                parsed
            }
        })
    }
}

/// Ordinary least-squares line through `ln(count)` by day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogLinearTrend {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Day-over-day growth estimate, `1 + slope`.
    pub growth: f64,
    pub points_used: usize,
}

/// What a successful logistic fit implies about the end of the outbreak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticProjection {
    /// Expected final cumulative count, `L + b`.
    pub final_count: f64,
    /// Early daily growth, `1 + k`.
    pub growth_rate: f64,
    /// Date of the inflection point, `start + round(x0)` days.
    pub inflection_date: Option<NaiveDate>,
}

/// The assembled, immutable per-region record consumed by rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPoint {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub population: Population,
    pub start_date: Option<NaiveDate>,
    pub confirmed: Vec<i64>,
    pub recovered: Vec<i64>,
    pub deaths: Vec<i64>,
    pub stale_days: usize,
    pub growth: Vec<f64>,
    pub logistic: FitResult,
    pub exponential: FitResult,
    pub projection: Option<LogisticProjection>,
    pub log_trend: Option<LogLinearTrend>,
    pub case_fatality_rate: Option<f64>,
    pub age_samples: Option<Vec<u32>>,
    pub death_age_samples: Option<Vec<u32>>,
}
