//! Growth-curve fitting.
//!
//! Responsibilities:
//!
//! - derive parameter bounds and a start grid per model
//! - solve each start (parallel) with bounded least squares
//! - report an explicit `Ok`/`Failed` result per model

pub mod fitter;
pub mod start_grid;

pub use fitter::*;
pub use start_grid::*;
