// src/report/mod.rs
pub mod snapshot;
pub mod stats;

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::file::replace_atomic;

pub use snapshot::Snapshot;
pub use stats::{CourseStats, OverallStats, PriorityStudent, ReportStats, WatchEntry, aggregate};

/// Pretty JSON for whatever renders the report (HTML mail, dashboards).
pub fn write_report(stats: &ReportStats, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(stats).map_err(|e| Error::file(path, "serialize report to", e))?;
    replace_atomic(path, &json).map_err(|e| Error::file(path, "write", e))?;
    debug!(path = %path.display(), "report written");
    Ok(())
}
