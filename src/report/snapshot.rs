// src/report/snapshot.rs
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::file::replace_atomic;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseSnapshot {
    pub student_count: usize,
    pub average_score: f64,
    pub a_grade_percent: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallSnapshot {
    pub average_score: f64,
    pub a_grade_percent: f64,
}

/// What the previous report saw. Compared against on the next run for deltas.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub taken_at: Option<String>,
    pub batch_id: Option<String>,
    pub students: BTreeSet<String>,
    pub courses: BTreeMap<String, CourseSnapshot>,
    /// student → course column → last enrolled score
    pub student_scores: BTreeMap<String, BTreeMap<String, f64>>,
    pub overall: Option<OverallSnapshot>,
}

impl Snapshot {
    /// Missing or unreadable cache → empty snapshot (no deltas), never an error.
    pub fn load(path: &Path) -> Snapshot {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), "no previous snapshot: {e}");
                return Snapshot::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), "snapshot unreadable, starting fresh: {e}");
                Snapshot::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| Error::file(path, "serialize snapshot to", e))?;
        replace_atomic(path, &json).map_err(|e| Error::file(path, "write", e))?;
        debug!(path = %path.display(), students = self.students.len(), "snapshot saved");
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty() && self.courses.is_empty()
    }

    pub fn score(&self, student: &str, course: &str) -> Option<f64> {
        self.student_scores.get(student)?.get(course).copied()
    }
}
