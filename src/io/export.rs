//! Serialize assembled region records for the rendering collaborator.

use std::collections::BTreeMap;
use std::io::Write;

use crate::domain::RegionPoint;
use crate::error::Result;

/// Write the region-name -> record map as pretty JSON.
pub fn write_points_json<W: Write>(writer: W, points: &BTreeMap<String, RegionPoint>) -> Result<()> {
    serde_json::to_writer_pretty(writer, points)?;
    Ok(())
}
