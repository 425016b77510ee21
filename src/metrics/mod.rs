//! Per-series derived metrics.
//!
//! - trailing reporting-gap removal (`sanitize`)
//! - day-over-day growth factor (`growth_factor`)
//! - log-linear trend and case fatality rate (`trend`)

pub mod growth;
pub mod sanitize;
pub mod trend;

pub use growth::*;
pub use sanitize::*;
pub use trend::*;
