//! Region aggregation: raw measurement tables -> per-region cumulative series.
//!
//! Steps, each a pure transform over the previous output:
//!
//! 1. **normalize**: for every `"<locality>, <CODE>"` sub-region row, add a copy
//!    relabelled with the parent's display name and stamped with the parent's
//!    coordinates. The original locality row stays as well.
//! 2. **group**: sum rows sharing `(display name, lat, lon)` element-wise.
//! 3. **join**: merge the three measurement tables on the group key,
//!    zero-filling a measurement a region has no row for.
//! 4. **synthesize**: add configured aggregate regions (e.g. "World"), summing
//!    the original rows once each.
//!
//! Unknown sub-region codes and mismatched date axes are fatal: silently
//! guessing would corrupt parent totals.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::{
    AggregateRegion, MeasureKind, PipelineConfig, RawRow, RawTable, RawTables, RegionKind, RegionSeries,
    SubRegionConfig,
};
use crate::error::{Error, Result};

/// Groups raw rows into region series using injected sub-region and aggregate
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct RegionAggregator<'a> {
    sub_regions: &'a SubRegionConfig,
    aggregates: &'a [AggregateRegion],
}

/// Parent display coordinates keyed by `(country, parent name)`.
pub type ParentCoordinates = HashMap<(String, String), (f64, f64)>;

impl<'a> RegionAggregator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            sub_regions: &config.sub_regions,
            aggregates: &config.aggregates,
        }
    }

    /// Build the region-name -> series mapping for one run.
    pub fn aggregate(&self, tables: &RawTables) -> Result<BTreeMap<String, RegionSeries>> {
        let days = tables.confirmed.days();
        for kind in [MeasureKind::Recovered, MeasureKind::Deaths] {
            let found = tables.get(kind).days();
            if found != days {
                return Err(Error::LengthMismatch {
                    context: format!("{kind} table date columns"),
                    expected: days,
                    found,
                });
            }
        }

        let parents = self.parent_coordinates(tables)?;
        let mut grouped = Vec::with_capacity(3);
        for kind in MeasureKind::ALL {
            let rows = self.normalize(&tables.get(kind).rows, &parents)?;
            grouped.push((kind, group_rows(&rows, days, kind)?));
        }

        let joined = join_groups(grouped, days);
        let mut regions = name_regions(joined)?;
        log::info!("aggregated {} regions over {days} days", regions.len());

        for agg in self.aggregates {
            let series = synthesize(agg, tables, &regions)?;
            regions.insert(series.name.clone(), series);
        }

        Ok(regions)
    }

    /// Resolve one coordinate pair per parent across all three tables, so
    /// every table's parent copies land on the same join key.
    ///
    /// A parent's own row wins, in confirmed, recovered, deaths order. Parents
    /// with no row anywhere take the first locality's coordinates.
    pub fn parent_coordinates(&self, tables: &RawTables) -> Result<ParentCoordinates> {
        let mut coords = ParentCoordinates::new();
        for kind in MeasureKind::ALL {
            for row in &tables.get(kind).rows {
                if let Some(label) = row.sub_region.as_deref() {
                    coords
                        .entry((row.country.clone(), label.to_string()))
                        .or_insert((row.lat, row.lon));
                }
            }
        }

        for kind in MeasureKind::ALL {
            for row in &tables.get(kind).rows {
                if let Some(parent) = self.parent_of(row)? {
                    coords
                        .entry((row.country.clone(), parent.to_string()))
                        .or_insert((row.lat, row.lon));
                }
            }
        }
        Ok(coords)
    }

    /// Add a parent-labelled copy of every locality row, placed at the
    /// parent's coordinates from `parents`.
    pub fn normalize(&self, rows: &[RawRow], parents: &ParentCoordinates) -> Result<Vec<RawRow>> {
        let mut out = rows.to_vec();
        for row in rows {
            let Some(parent) = self.parent_of(row)? else {
                continue;
            };
            let (lat, lon) = parents
                .get(&(row.country.clone(), parent.to_string()))
                .copied()
                .unwrap_or((row.lat, row.lon));

            out.push(RawRow {
                sub_region: Some(parent.to_string()),
                country: row.country.clone(),
                lat,
                lon,
                values: row.values.clone(),
            });
        }
        Ok(out)
    }

    /// Parent display name of a locality row; `None` for any other row.
    fn parent_of(&self, row: &RawRow) -> Result<Option<&'a str>> {
        let Some(label) = row.sub_region.as_deref() else {
            return Ok(None);
        };
        if self.sub_regions.is_excluded(label) {
            return Ok(None);
        }
        let Some(code) = locality_code(label) else {
            return Ok(None);
        };
        match self.sub_regions.codes.get(code) {
            Some(parent) => Ok(Some(parent.as_str())),
            None => Err(Error::UnknownSubRegionCode {
                label: label.to_string(),
                code: code.to_string(),
            }),
        }
    }
}

/// The `CODE` of a `"<locality>, <CODE>"` label.
///
/// A code is a single token of ASCII uppercase letters, digits and dots
/// (`"WA"`, `"D.C."`). Labels whose tail is an ordinary phrase
/// (`"Bonaire, Sint Eustatius and Saba"`) are not locality labels.
fn locality_code(label: &str) -> Option<&str> {
    let (locality, code) = label.rsplit_once(',')?;
    let code = code.trim();
    let is_code = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.');
    (is_code && !locality.trim().is_empty()).then_some(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    lat: u64,
    lon: u64,
}

fn coord_bits(v: f64) -> u64 {
    // Fold -0.0 into 0.0 so both land on one key.
    if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

#[derive(Debug, Clone)]
struct Group {
    name: String,
    country: String,
    lat: f64,
    lon: f64,
    values: Vec<i64>,
}

/// Sum rows sharing `(display name, lat, lon)`, keeping first-seen order.
fn group_rows(rows: &[RawRow], days: usize, kind: MeasureKind) -> Result<Vec<Group>> {
    let mut index: HashMap<(String, GroupKey), usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for row in rows {
        let name = row.display_name();
        if row.values.len() != days {
            return Err(Error::LengthMismatch {
                context: format!("{kind} row `{name}`"),
                expected: days,
                found: row.values.len(),
            });
        }

        let key = (
            name.to_string(),
            GroupKey {
                lat: coord_bits(row.lat),
                lon: coord_bits(row.lon),
            },
        );
        match index.get(&key) {
            Some(&idx) => {
                for (acc, v) in groups[idx].values.iter_mut().zip(&row.values) {
                    *acc += v;
                }
            }
            None => {
                index.insert(key, groups.len());
                groups.push(Group {
                    name: name.to_string(),
                    country: row.country.clone(),
                    lat: row.lat,
                    lon: row.lon,
                    values: row.values.clone(),
                });
            }
        }
    }

    Ok(groups)
}

#[derive(Debug, Clone)]
struct Joined {
    name: String,
    country: String,
    lat: f64,
    lon: f64,
    series: [Option<Vec<i64>>; 3],
}

fn measure_slot(kind: MeasureKind) -> usize {
    match kind {
        MeasureKind::Confirmed => 0,
        MeasureKind::Recovered => 1,
        MeasureKind::Deaths => 2,
    }
}

fn join_groups(grouped: Vec<(MeasureKind, Vec<Group>)>, days: usize) -> Vec<RegionSeries> {
    let mut index: HashMap<(String, GroupKey), usize> = HashMap::new();
    let mut joined: Vec<Joined> = Vec::new();

    for (kind, groups) in grouped {
        for group in groups {
            let key = (
                group.name.clone(),
                GroupKey {
                    lat: coord_bits(group.lat),
                    lon: coord_bits(group.lon),
                },
            );
            let idx = *index.entry(key).or_insert_with(|| {
                joined.push(Joined {
                    name: group.name.clone(),
                    country: group.country.clone(),
                    lat: group.lat,
                    lon: group.lon,
                    series: [None, None, None],
                });
                joined.len() - 1
            });
            joined[idx].series[measure_slot(kind)] = Some(group.values);
        }
    }

    joined
        .into_iter()
        .map(|j| {
            let [confirmed, recovered, deaths] = j.series;
            let fill = |kind: MeasureKind, values: Option<Vec<i64>>| {
                values.unwrap_or_else(|| {
                    log::debug!("region `{}` has no {kind} row, zero-filling", j.name);
                    vec![0; days]
                })
            };
            RegionSeries {
                confirmed: fill(MeasureKind::Confirmed, confirmed),
                recovered: fill(MeasureKind::Recovered, recovered),
                deaths: fill(MeasureKind::Deaths, deaths),
                name: j.name,
                country: j.country,
                kind: RegionKind::Reported,
                lat: j.lat,
                lon: j.lon,
            }
        })
        .collect()
}

/// Key regions by name. A name reused at different coordinates is qualified
/// with its country; a collision after that is fatal.
fn name_regions(regions: Vec<RegionSeries>) -> Result<BTreeMap<String, RegionSeries>> {
    let mut out = BTreeMap::new();
    for mut region in regions {
        if out.contains_key(&region.name) {
            let qualified = format!("{} ({})", region.name, region.country);
            if out.contains_key(&qualified) {
                return Err(Error::DuplicateRegion {
                    name: region.name,
                    lat: region.lat,
                    lon: region.lon,
                });
            }
            log::debug!("region name `{}` reused, renaming to `{qualified}`", region.name);
            region.name = qualified;
        }
        out.insert(region.name.clone(), region);
    }
    Ok(out)
}

fn synthesize(
    agg: &AggregateRegion,
    tables: &RawTables,
    regions: &BTreeMap<String, RegionSeries>,
) -> Result<RegionSeries> {
    if country_names(tables).contains(agg.name.as_str()) || regions.contains_key(&agg.name) {
        return Err(Error::AggregateCollision {
            name: agg.name.clone(),
        });
    }

    let sum = |table: &RawTable| {
        let mut total = vec![0i64; table.days()];
        for row in table.rows.iter().filter(|row| agg.matches(&row.country)) {
            for (acc, v) in total.iter_mut().zip(&row.values) {
                *acc += v;
            }
        }
        total
    };

    Ok(RegionSeries {
        name: agg.name.clone(),
        country: agg.name.clone(),
        kind: RegionKind::Aggregate,
        lat: agg.lat,
        lon: agg.lon,
        confirmed: sum(&tables.confirmed),
        recovered: sum(&tables.recovered),
        deaths: sum(&tables.deaths),
    })
}

/// Every country name that appears in any table.
pub fn country_names(tables: &RawTables) -> HashSet<&str> {
    MeasureKind::ALL
        .iter()
        .flat_map(|&kind| tables.get(kind).rows.iter().map(|row| row.country.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(sub: Option<&str>, country: &str, lat: f64, lon: f64, values: &[i64]) -> RawRow {
        RawRow {
            sub_region: sub.map(str::to_string),
            country: country.to_string(),
            lat,
            lon,
            values: values.to_vec(),
        }
    }

    fn table(kind: MeasureKind, days: usize, rows: Vec<RawRow>) -> RawTable {
        let start = NaiveDate::from_ymd_opt(2020, 1, 22).unwrap();
        RawTable {
            kind,
            dates: (0..days as u64)
                .map(|d| start + chrono::Days::new(d))
                .collect(),
            rows,
        }
    }

    /// Same rows in all three tables.
    fn tables(days: usize, rows: Vec<RawRow>) -> RawTables {
        RawTables {
            confirmed: table(MeasureKind::Confirmed, days, rows.clone()),
            recovered: table(MeasureKind::Recovered, days, rows.clone()),
            deaths: table(MeasureKind::Deaths, days, rows),
        }
    }

    fn us_config() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.sub_regions
            .codes
            .insert("WA".to_string(), "Washington".to_string());
        cfg.sub_regions
            .codes
            .insert("CA".to_string(), "California".to_string());
        cfg.sub_regions.exclusions.push("D.C.".to_string());
        cfg
    }

    #[test]
    fn rows_sharing_a_key_are_summed() {
        let t = tables(
            3,
            vec![
                row(None, "France", 46.0, 2.0, &[1, 2, 3]),
                row(None, "France", 46.0, 2.0, &[4, 5, 6]),
            ],
        );
        let cfg = PipelineConfig::default();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(regions["France"].confirmed, vec![5, 7, 9]);
        assert_eq!(regions["France"].deaths, vec![5, 7, 9]);
    }

    #[test]
    fn locality_is_merged_into_parent_and_kept() {
        let t = tables(
            3,
            vec![
                row(Some("Washington"), "US", 47.4, -121.5, &[1, 2, 3]),
                row(Some("King County, WA"), "US", 47.6, -122.3, &[1, 1, 2]),
            ],
        );
        let cfg = us_config();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        let parent = &regions["Washington"];
        assert_eq!(parent.confirmed, vec![2, 3, 5]);
        assert_eq!((parent.lat, parent.lon), (47.4, -121.5));
        assert_eq!(regions["King County, WA"].confirmed, vec![1, 1, 2]);
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn parent_without_row_takes_first_locality_coordinates() {
        let t = tables(
            2,
            vec![
                row(Some("Orange County, CA"), "US", 33.7, -117.8, &[1, 2]),
                row(Some("Santa Clara, CA"), "US", 37.3, -121.9, &[3, 4]),
            ],
        );
        let cfg = us_config();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        let parent = &regions["California"];
        assert_eq!(parent.confirmed, vec![4, 6]);
        assert_eq!((parent.lat, parent.lon), (33.7, -117.8));
    }

    #[test]
    fn unknown_code_is_fatal() {
        let t = tables(1, vec![row(Some("Cook County, IL"), "US", 41.8, -87.6, &[1])]);
        let cfg = us_config();
        let err = RegionAggregator::new(&cfg).aggregate(&t).unwrap_err();
        match err {
            Error::UnknownSubRegionCode { label, code } => {
                assert_eq!(label, "Cook County, IL");
                assert_eq!(code, "IL");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn excluded_district_is_neither_merged_nor_duplicated() {
        let t = tables(1, vec![row(Some("Washington, D.C."), "US", 38.9, -77.0, &[7])]);
        let cfg = us_config();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(regions["Washington, D.C."].confirmed, vec![7]);
    }

    #[test]
    fn phrases_after_a_comma_are_not_codes() {
        assert_eq!(locality_code("King County, WA"), Some("WA"));
        assert_eq!(locality_code("Washington, D.C."), Some("D.C."));
        assert_eq!(locality_code("Bonaire, Sint Eustatius and Saba"), None);
        assert_eq!(locality_code("Hubei"), None);
        assert_eq!(locality_code(", WA"), None);
    }

    #[test]
    fn missing_measurement_row_is_zero_filled() {
        let t = RawTables {
            confirmed: table(
                MeasureKind::Confirmed,
                2,
                vec![row(Some("Ontario"), "Canada", 51.2, -85.3, &[3, 4])],
            ),
            recovered: table(MeasureKind::Recovered, 2, vec![]),
            deaths: table(
                MeasureKind::Deaths,
                2,
                vec![row(Some("Ontario"), "Canada", 51.2, -85.3, &[0, 1])],
            ),
        };
        let cfg = PipelineConfig::default();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        let on = &regions["Ontario"];
        assert_eq!(on.recovered, vec![0, 0]);
        assert_eq!(on.deaths, vec![0, 1]);
    }

    #[test]
    fn mismatched_tables_are_fatal() {
        let mut t = tables(2, vec![row(None, "Italy", 41.9, 12.6, &[1, 2])]);
        t.deaths = table(MeasureKind::Deaths, 3, vec![row(None, "Italy", 41.9, 12.6, &[1, 2, 3])]);
        let cfg = PipelineConfig::default();
        assert!(matches!(
            RegionAggregator::new(&cfg).aggregate(&t),
            Err(Error::LengthMismatch { expected: 2, found: 3, .. })
        ));

        let t = tables(3, vec![row(None, "Italy", 41.9, 12.6, &[1, 2])]);
        assert!(matches!(
            RegionAggregator::new(&cfg).aggregate(&t),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn aggregate_sums_original_rows_once() {
        let t = tables(
            2,
            vec![
                row(Some("Washington"), "US", 47.4, -121.5, &[1, 2]),
                row(Some("King County, WA"), "US", 47.6, -122.3, &[1, 1]),
                row(None, "Italy", 41.9, 12.6, &[10, 20]),
                row(Some("Hubei"), "China", 30.9, 112.2, &[100, 200]),
            ],
        );
        let mut cfg = us_config();
        cfg.aggregates.push(AggregateRegion {
            name: "World".to_string(),
            lat: 0.0,
            lon: 0.0,
            include: vec![],
            exclude: vec![],
        });
        cfg.aggregates.push(AggregateRegion {
            name: "Outside China".to_string(),
            lat: 10.0,
            lon: 10.0,
            include: vec![],
            exclude: vec!["China".to_string()],
        });
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        assert_eq!(regions["World"].confirmed, vec![112, 223]);
        assert_eq!(regions["World"].kind, RegionKind::Aggregate);
        assert_eq!(regions["Outside China"].confirmed, vec![12, 23]);
        assert_eq!((regions["Outside China"].lat, regions["Outside China"].lon), (10.0, 10.0));
    }

    #[test]
    fn aggregate_named_like_a_country_is_rejected() {
        let t = tables(1, vec![row(None, "World", 0.0, 0.0, &[1])]);
        let mut cfg = PipelineConfig::default();
        cfg.aggregates.push(AggregateRegion {
            name: "World".to_string(),
            lat: 0.0,
            lon: 0.0,
            include: vec![],
            exclude: vec![],
        });
        assert!(matches!(
            RegionAggregator::new(&cfg).aggregate(&t),
            Err(Error::AggregateCollision { .. })
        ));
    }

    #[test]
    fn reused_names_are_qualified_by_country() {
        let t = tables(
            1,
            vec![
                row(Some("Diamond Princess"), "US", 35.4, 139.6, &[40]),
                row(Some("Diamond Princess"), "Canada", 0.0, 0.0, &[2]),
            ],
        );
        let cfg = PipelineConfig::default();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        assert_eq!(regions["Diamond Princess"].confirmed, vec![40]);
        assert_eq!(regions["Diamond Princess (Canada)"].confirmed, vec![2]);
    }

    #[test]
    fn normalize_leaves_input_untouched() {
        let rows = vec![row(Some("King County, WA"), "US", 47.6, -122.3, &[1])];
        let cfg = us_config();
        let mut parents = ParentCoordinates::new();
        parents.insert(("US".to_string(), "Washington".to_string()), (47.4, -121.5));
        let normalized = RegionAggregator::new(&cfg).normalize(&rows, &parents).unwrap();

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0], rows[0]);
        assert_eq!(normalized[1].sub_region.as_deref(), Some("Washington"));
        assert_eq!((normalized[1].lat, normalized[1].lon), (47.4, -121.5));
    }

    #[test]
    fn parent_row_in_one_table_anchors_every_table() {
        let t = RawTables {
            confirmed: table(
                MeasureKind::Confirmed,
                3,
                vec![
                    row(Some("Washington"), "US", 47.4, -121.5, &[10, 10, 10]),
                    row(Some("King County, WA"), "US", 47.6, -122.3, &[1, 1, 1]),
                ],
            ),
            recovered: table(MeasureKind::Recovered, 3, vec![]),
            deaths: table(
                MeasureKind::Deaths,
                3,
                vec![row(Some("King County, WA"), "US", 47.6, -122.3, &[0, 1, 1])],
            ),
        };
        let cfg = us_config();
        let regions = RegionAggregator::new(&cfg).aggregate(&t).unwrap();

        assert_eq!(regions.len(), 2, "{:?}", regions.keys().collect::<Vec<_>>());
        let parent = &regions["Washington"];
        assert_eq!((parent.lat, parent.lon), (47.4, -121.5));
        assert_eq!(parent.confirmed, vec![11, 11, 11]);
        assert_eq!(parent.deaths, vec![0, 1, 1]);
        assert_eq!(regions["King County, WA"].deaths, vec![0, 1, 1]);
    }
}
