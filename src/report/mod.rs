//! Region record assembly and run-level summaries.

pub mod assemble;
pub mod projection;

pub use assemble::*;
pub use projection::*;
