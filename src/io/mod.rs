//! Input/output adapters.
//!
//! - measurement-table CSV ingest (`ingest`)
//! - configuration and reference JSON (`reference`)
//! - region record export (`export`)

pub mod export;
pub mod ingest;
pub mod reference;

pub use export::*;
pub use ingest::*;
pub use reference::*;
