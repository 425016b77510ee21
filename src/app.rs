//! File-level orchestration around the in-memory pipeline.
//!
//! Loads the three measurement tables plus optional configuration and
//! reference JSON, runs [`pipeline::run_pipeline`], and writes the assembled
//! records for the rendering collaborator.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::domain::{PipelineConfig, ReferenceData};
use crate::error::{Error, Result};
use crate::io::{load_config, load_raw_tables, load_reference, write_points_json};

pub mod pipeline;

pub use pipeline::{PipelineOutput, analyze_region, run_pipeline};

/// Input and output locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub confirmed: PathBuf,
    pub recovered: PathBuf,
    pub deaths: PathBuf,
    /// `PipelineConfig` JSON; defaults when absent.
    pub config: Option<PathBuf>,
    /// `ReferenceData` JSON; empty lookups when absent.
    pub reference: Option<PathBuf>,
}

/// Load every input named in `paths` and run the pipeline.
pub fn run_from_files(paths: &RunPaths) -> Result<PipelineOutput> {
    let config = match &paths.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    let reference = match &paths.reference {
        Some(path) => load_reference(path)?,
        None => ReferenceData::default(),
    };

    let ingested = load_raw_tables(&paths.confirmed, &paths.recovered, &paths.deaths)?;
    if !ingested.row_errors.is_empty() {
        log::warn!("{} malformed rows skipped during ingest", ingested.row_errors.len());
    }

    run_pipeline(&ingested.tables, &config, &reference)
}

/// Write `output.points` as JSON to `path`.
pub fn write_output(path: &Path, output: &PipelineOutput) -> Result<()> {
    let file = File::create(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    write_points_json(BufWriter::new(file), &output.points)?;
    log::info!("wrote {} region records to {}", output.points.len(), path.display());
    Ok(())
}
