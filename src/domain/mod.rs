//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - raw and aggregated series (`RawTable`, `RegionSeries`)
//! - fit outputs (`FitResult`, `FitStatus`, `FitFailure`)
//! - the assembled record (`RegionPoint`)
//! - run configuration and lookup tables (`PipelineConfig`, `ReferenceData`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
