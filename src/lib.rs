//! `epi-curves` library crate.
//!
//! Turns cumulative per-region case, recovery and death tables into one
//! analytic record per region:
//!
//! - aggregation of raw rows into regions, sub-regions merged into parents
//!   (`aggregate`)
//! - reporting-gap removal, growth factors and trends (`metrics`)
//! - bounded logistic and exponential fits (`fit`, `math`, `models`)
//! - record assembly and run totals (`report`)
//! - SIR simulation and rate calibration (`sir`)
//!
//! `app` wires the stages together; `io` holds the file adapters.

pub mod aggregate;
pub mod app;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod metrics;
pub mod models;
pub mod report;
pub mod sir;

pub use error::{Error, Result};
