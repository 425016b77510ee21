//! Run configuration and collaborator-supplied lookup tables.
//!
//! Both are plain serde structs so they can be loaded from JSON (see
//! `io::reference`) or built in code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Population;
use crate::error::{Error, Result};
use crate::math::SolverOptions;

/// A full run's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sub_regions: SubRegionConfig,
    /// Pseudo-regions synthesized by summing matching rows.
    pub aggregates: Vec<AggregateRegion>,
    pub solver: SolverOptions,
    /// Counts at or below this are ignored by the log-linear trend.
    pub trend_minimum: i64,
    /// Analyze regions on the rayon pool.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sub_regions: SubRegionConfig::default(),
            aggregates: Vec::new(),
            solver: SolverOptions::default(),
            trend_minimum: crate::metrics::DEFAULT_TREND_MINIMUM,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.solver.max_iterations == 0 {
            return Err(Error::Config("solver.max_iterations must be > 0".to_string()));
        }
        for (name, tol) in [
            ("ftol", self.solver.ftol),
            ("xtol", self.solver.xtol),
            ("gtol", self.solver.gtol),
        ] {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(Error::Config(format!("solver.{name} must be finite and >= 0")));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for agg in &self.aggregates {
            if agg.name.trim().is_empty() {
                return Err(Error::Config("aggregate region with empty name".to_string()));
            }
            if !(agg.lat.is_finite() && agg.lon.is_finite()) {
                return Err(Error::Config(format!(
                    "aggregate region `{}` has non-finite coordinates",
                    agg.name
                )));
            }
            if !seen.insert(agg.name.as_str()) {
                return Err(Error::Config(format!("aggregate region `{}` defined twice", agg.name)));
            }
        }
        Ok(())
    }
}

/// Remapping of `"<locality>, <code>"` sub-region labels onto parents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubRegionConfig {
    /// Sub-region code to parent display name, e.g. `"WA" -> "Washington"`.
    pub codes: BTreeMap<String, String>,
    /// Labels containing any of these substrings are never remapped.
    pub exclusions: Vec<String>,
}

impl SubRegionConfig {
    pub fn is_excluded(&self, label: &str) -> bool {
        self.exclusions
            .iter()
            .any(|pattern| !pattern.is_empty() && label.contains(pattern.as_str()))
    }
}

/// A synthesized region: the sum of every matching raw row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRegion {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Countries to include (exact match). Empty means every country.
    #[serde(default)]
    pub include: Vec<String>,
    /// Countries whose name contains any of these substrings are left out.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl AggregateRegion {
    pub fn matches(&self, country: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|c| c == country);
        let excluded = self
            .exclude
            .iter()
            .any(|pattern| !pattern.is_empty() && country.contains(pattern.as_str()));
        included && !excluded
    }
}

/// Read-only lookup tables keyed by region name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    pub populations: BTreeMap<String, Population>,
    pub age_samples: BTreeMap<String, Vec<u32>>,
    pub death_age_samples: BTreeMap<String, Vec<u32>>,
}

impl ReferenceData {
    /// Population for `name`, or the unknown sentinel on a miss.
    pub fn population(&self, name: &str) -> Population {
        self.populations.get(name).copied().unwrap_or(Population::Unknown)
    }
}
