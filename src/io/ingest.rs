//! CSV ingest for the per-measurement time-series tables.
//!
//! Each table has the fixed columns `Province/State`, `Country/Region`, `Lat`,
//! `Long`, then one column per reporting date in chronological order.
//!
//! - **Strict header**: missing fixed columns, unparseable or unordered date
//!   columns are fatal.
//! - **Row-level validation**: malformed rows are skipped and reported, never
//!   silently patched.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;

use crate::domain::{MeasureKind, RawRow, RawTable, RawTables};
use crate::error::{Error, Result};

const SUB_REGION: &str = "province/state";
const COUNTRY: &str = "country/region";
const LAT: &str = "lat";
const LON: &str = "long";

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// One parsed table plus what was skipped on the way.
#[derive(Debug, Clone)]
pub struct IngestedTable {
    pub table: RawTable,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// All three tables of one run.
#[derive(Debug, Clone)]
pub struct IngestedTables {
    pub tables: RawTables,
    pub row_errors: Vec<(MeasureKind, RowError)>,
}

/// Column positions resolved from the header.
#[derive(Debug, Clone)]
struct Layout {
    sub_region: usize,
    country: usize,
    lat: usize,
    lon: usize,
    /// `(column index, date)` in column order.
    dates: Vec<(usize, NaiveDate)>,
    width: usize,
}

/// Parse one measurement table from any reader.
pub fn read_raw_table<R: Read>(reader: R, kind: MeasureKind) -> Result<IngestedTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let layout = resolve_layout(&headers, kind)?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header; lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse_row(&record, &layout));
        match parsed {
            Ok(row) => rows.push(row),
            Err(message) => {
                log::warn!("{kind} table line {line}: {message}; row skipped");
                row_errors.push(RowError { line, message });
            }
        }
    }

    Ok(IngestedTable {
        table: RawTable {
            kind,
            dates: layout.dates.iter().map(|&(_, d)| d).collect(),
            rows,
        },
        row_errors,
        rows_read,
    })
}

/// Open and parse one measurement table.
pub fn load_raw_table(path: &Path, kind: MeasureKind) -> Result<IngestedTable> {
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_raw_table(file, kind)
}

/// Open and parse the confirmed, recovered and deaths tables.
pub fn load_raw_tables(confirmed: &Path, recovered: &Path, deaths: &Path) -> Result<IngestedTables> {
    let confirmed = load_raw_table(confirmed, MeasureKind::Confirmed)?;
    let recovered = load_raw_table(recovered, MeasureKind::Recovered)?;
    let deaths = load_raw_table(deaths, MeasureKind::Deaths)?;

    let mut row_errors = Vec::new();
    for ingested in [&confirmed, &recovered, &deaths] {
        log::info!(
            "{} table: kept {} of {} rows over {} days",
            ingested.table.kind,
            ingested.table.rows.len(),
            ingested.rows_read,
            ingested.table.days()
        );
        row_errors.extend(ingested.row_errors.iter().map(|e| (ingested.table.kind, e.clone())));
    }

    Ok(IngestedTables {
        tables: RawTables::new(confirmed.table, recovered.table, deaths.table)?,
        row_errors,
    })
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn resolve_layout(headers: &StringRecord, kind: MeasureKind) -> Result<Layout> {
    let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
    let header_map: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();

    let column = |name: &str| {
        header_map.get(name).copied().ok_or_else(|| Error::Schema {
            kind,
            message: format!("missing required column `{name}`"),
        })
    };
    let sub_region = column(SUB_REGION)?;
    let country = column(COUNTRY)?;
    let lat = column(LAT)?;
    let lon = column(LON)?;

    let mut dates: Vec<(usize, NaiveDate)> = Vec::new();
    for (idx, raw) in headers.iter().enumerate() {
        if [sub_region, country, lat, lon].contains(&idx) {
            continue;
        }
        let raw = raw.trim().trim_start_matches('\u{feff}');
        let date = parse_date(raw).ok_or_else(|| Error::Schema {
            kind,
            message: format!("column `{raw}` is not a date"),
        })?;
        if let Some(&(_, prev)) = dates.last() {
            if date <= prev {
                return Err(Error::Schema {
                    kind,
                    message: format!("date column {date} does not follow {prev}"),
                });
            }
        }
        dates.push((idx, date));
    }

    Ok(Layout {
        sub_region,
        country,
        lat,
        lon,
        dates,
        width: headers.len(),
    })
}

fn parse_row(record: &StringRecord, layout: &Layout) -> std::result::Result<RawRow, String> {
    if record.len() != layout.width {
        return Err(format!("expected {} fields, found {}", layout.width, record.len()));
    }

    let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

    let country = field(layout.country);
    if country.is_empty() {
        return Err("missing `Country/Region` value".to_string());
    }
    let sub_region = Some(field(layout.sub_region))
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let lat = parse_coordinate(field(layout.lat), "Lat")?;
    let lon = parse_coordinate(field(layout.lon), "Long")?;

    let values = layout
        .dates
        .iter()
        .map(|&(idx, date)| parse_count(field(idx)).map_err(|e| format!("{date}: {e}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(RawRow {
        sub_region,
        country: country.to_string(),
        lat,
        lon,
        values,
    })
}

fn parse_coordinate(s: &str, name: &str) -> std::result::Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("invalid `{name}` value '{s}'")),
    }
}

/// Empty cells count as zero; integral floats (`"12.0"`) are accepted.
fn parse_count(s: &str) -> std::result::Result<i64, String> {
    if s.is_empty() {
        return Ok(0);
    }
    let value = match s.parse::<i64>() {
        Ok(v) => v,
        Err(_) => match s.parse::<f64>() {
            Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => v as i64,
            _ => return Err(format!("invalid count '{s}'")),
        },
    };
    if value < 0 {
        return Err(format!("negative count {value}"));
    }
    Ok(value)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    // Two-digit years first: `%Y` would read "1/22/20" as the year 20.
    const FMTS: [&str; 3] = ["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"];
    FMTS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}Province/State,Country/Region,Lat,Long,1/22/20,1/23/20,1/24/20
,Italy,41.87,12.56,0,2,3
King County, WA,US,47.6,-122.3,1,1,2
Hubei,China,30.97,112.27,444,444.0,
,Atlantis,north,0,1,2,3
,Spain,40.4,-3.7,1,-2,3
,France,46.2,2.2,1,2
";

    #[test]
    fn parses_rows_and_reports_bad_ones() {
        // Quoting keeps the comma inside the locality label.
        let csv = SAMPLE.replace("King County, WA", "\"King County, WA\"");
        let ingested = read_raw_table(csv.as_bytes(), MeasureKind::Confirmed).unwrap();
        let table = &ingested.table;

        assert_eq!(
            table.dates,
            vec![
                NaiveDate::from_ymd_opt(2020, 1, 22).unwrap(),
                NaiveDate::from_ymd_opt(2020, 1, 23).unwrap(),
                NaiveDate::from_ymd_opt(2020, 1, 24).unwrap(),
            ]
        );
        assert_eq!(ingested.rows_read, 6);
        assert_eq!(table.rows.len(), 3);

        assert_eq!(table.rows[0].sub_region, None);
        assert_eq!(table.rows[0].display_name(), "Italy");
        assert_eq!(table.rows[1].display_name(), "King County, WA");
        assert_eq!(table.rows[2].values, vec![444, 444, 0]);

        let lines: Vec<usize> = ingested.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![5, 6, 7]);
        assert!(ingested.row_errors[1].message.contains("negative"));
    }

    #[test]
    fn missing_fixed_column_is_fatal() {
        let csv = "Country/Region,Lat,Long,1/22/20\nItaly,41.8,12.5,0\n";
        let err = read_raw_table(csv.as_bytes(), MeasureKind::Deaths).unwrap_err();
        assert!(matches!(err, Error::Schema { kind: MeasureKind::Deaths, .. }));
    }

    #[test]
    fn unordered_or_unknown_date_columns_are_fatal() {
        let csv = "Province/State,Country/Region,Lat,Long,1/23/20,1/22/20\n";
        assert!(read_raw_table(csv.as_bytes(), MeasureKind::Confirmed).is_err());

        let csv = "Province/State,Country/Region,Lat,Long,1/22/20,notes\n";
        assert!(read_raw_table(csv.as_bytes(), MeasureKind::Confirmed).is_err());
    }

    #[test]
    fn accepts_common_date_spellings() {
        let d = NaiveDate::from_ymd_opt(2020, 3, 5).unwrap();
        assert_eq!(parse_date("3/5/20"), Some(d));
        assert_eq!(parse_date("03/05/2020"), Some(d));
        assert_eq!(parse_date("2020-03-05"), Some(d));
        assert_eq!(parse_date("Lat"), None);
    }

    #[test]
    fn counts_accept_integral_floats_only() {
        assert_eq!(parse_count(""), Ok(0));
        assert_eq!(parse_count("17"), Ok(17));
        assert_eq!(parse_count("17.0"), Ok(17));
        assert!(parse_count("17.5").is_err());
        assert!(parse_count("-1").is_err());
        assert!(parse_count("abc").is_err());
    }
}
