// src/store.rs
//! Persisted wide table: one row per (student, batch), one column per course.
//!
//! On disk: `student_name, localized_name_a, localized_name_b, is_latest,
//! <course columns...>, observed_at, batch_id`. Course columns are whatever
//! sits between the fixed ones, in file order.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::batch::BatchId;
use crate::csv::{HeaderIndex, SEP, parse_rows, rows_to_string, split_header};
use crate::error::{Error, Result};
use crate::file::{is_missing_or_empty, replace_atomic};
use crate::observation::{COL_NAME_A, COL_NAME_B, COL_OBSERVED_AT, COL_STUDENT, Score, format_timestamp, parse_timestamp};

pub const COL_IS_LATEST: &str = "is_latest";
pub const COL_BATCH_ID: &str = "batch_id";

const LEADING: [&str; 4] = [COL_STUDENT, COL_NAME_A, COL_NAME_B, COL_IS_LATEST];
const TRAILING: [&str; 2] = [COL_OBSERVED_AT, COL_BATCH_ID];

fn is_fixed(h: &str) -> bool {
    LEADING.contains(&h) || TRAILING.contains(&h)
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[derive(Clone, Debug, PartialEq)]
pub struct WideRecord {
    pub student: String,
    pub localized_name_a: String,
    pub localized_name_b: String,
    pub is_latest: bool,
    /// Keyed by course column. A missing key reads as not enrolled.
    pub scores: HashMap<String, Score>,
    pub observed_at: NaiveDateTime,
    pub batch_id: BatchId,
}

impl WideRecord {
    pub fn score(&self, column: &str) -> Score {
        self.scores.get(column).copied().unwrap_or(Score::NotEnrolled)
    }

    pub fn identity_missing(&self) -> bool {
        self.localized_name_a.is_empty() || self.localized_name_b.is_empty()
    }

    fn to_row(&self, courses: &[String]) -> Vec<String> {
        let mut row = Vec::with_capacity(courses.len() + LEADING.len() + TRAILING.len());
        row.push(self.student.clone());
        row.push(self.localized_name_a.clone());
        row.push(self.localized_name_b.clone());
        row.push(s!(if self.is_latest { "true" } else { "false" }));
        row.extend(courses.iter().map(|c| self.score(c).to_string()));
        row.push(format_timestamp(&self.observed_at));
        row.push(self.batch_id.to_string());
        row
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WideTable {
    /// Column order as written.
    pub courses: Vec<String>,
    pub records: Vec<WideRecord>,
}

impl WideTable {
    pub fn new(courses: Vec<String>) -> Self {
        Self { courses, records: Vec::new() }
    }

    /// `None` when the file is missing or empty.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if is_missing_or_empty(path) {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| Error::file(path, "read", e))?;
        let (headers, rows) = split_header(parse_rows(&text, SEP));
        let Some(headers) = headers else { return Ok(None) };

        let subject = path.display().to_string();
        let idx = HeaderIndex::new(&headers);
        for required in [COL_STUDENT, COL_OBSERVED_AT, COL_BATCH_ID] {
            if idx.position(required).is_none() {
                return Err(Error::data(&subject, "wide table", format!("missing column {required}")));
            }
        }
        let courses: Vec<String> = headers.iter()
            .filter(|h| !h.is_empty() && !is_fixed(h))
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let line = i + 2;
            let raw_ts = idx.cell(row, COL_OBSERVED_AT);
            let observed_at = parse_timestamp(raw_ts).ok_or_else(|| {
                Error::data(&subject, "wide table", format!("line {line}: bad timestamp {raw_ts:?}"))
            })?;
            let scores = courses.iter()
                .map(|c| (c.clone(), Score::parse(idx.cell(row, c))))
                .collect();
            records.push(WideRecord {
                student: s!(idx.cell(row, COL_STUDENT).trim()),
                localized_name_a: s!(idx.cell(row, COL_NAME_A).trim()),
                localized_name_b: s!(idx.cell(row, COL_NAME_B).trim()),
                is_latest: parse_flag(idx.cell(row, COL_IS_LATEST)),
                scores,
                observed_at,
                batch_id: BatchId::from_stored(idx.cell(row, COL_BATCH_ID)),
            });
        }
        debug!(path = %path.display(), rows = records.len(), courses = courses.len(), "wide table loaded");
        Ok(Some(Self { courses, records }))
    }

    pub fn headers(&self) -> Vec<String> {
        LEADING.iter().map(|h| s!(*h))
            .chain(self.courses.iter().cloned())
            .chain(TRAILING.iter().map(|h| s!(*h)))
            .collect()
    }

    pub fn to_rows(&self) -> Vec<Vec<String>> {
        self.records.iter().map(|r| r.to_row(&self.courses)).collect()
    }

    /// Whole-file replace through a temp file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = rows_to_string(Some(&self.headers()), &self.to_rows(), SEP);
        replace_atomic(path, text.as_bytes()).map_err(|e| Error::file(path, "write", e))?;
        debug!(path = %path.display(), rows = self.records.len(), "wide table written");
        Ok(())
    }

    /// Append any column not already present. Existing columns never move or go away.
    pub fn add_courses<'a, I: IntoIterator<Item = &'a String>>(&mut self, columns: I) {
        for c in columns {
            if !self.courses.contains(c) { self.courses.push(c.clone()); }
        }
    }

    pub fn latest(&self) -> impl Iterator<Item = &WideRecord> {
        self.records.iter().filter(|r| r.is_latest)
    }

    pub fn batch_ids(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.batch_id.as_str()).collect()
    }

    /// Table holding only the latest rows, same columns.
    pub fn latest_only(&self) -> WideTable {
        WideTable { courses: self.courses.clone(), records: self.latest().cloned().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_read_loosely() {
        assert!(parse_flag("True"));
        assert!(parse_flag(" true "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("False"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn course_columns_sit_between_fixed_ones() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("wide.csv");
        fs::write(&p, "\
student_name,localized_name_a,localized_name_b,is_latest,Calculus 3A,Biology,observed_at,batch_id
Alice,艾丽丝,Alice,True,91,N/A,2025-03-01 08:30:00,250301-0830
").unwrap();
        let t = WideTable::load(&p).unwrap().unwrap();
        assert_eq!(t.courses, vec!["Calculus 3A", "Biology"]);
        let r = &t.records[0];
        assert!(r.is_latest);
        assert_eq!(r.score("Calculus 3A"), Score::Value(91.0));
        assert_eq!(r.score("Biology"), Score::NotEnrolled);
        assert_eq!(r.score("Never Seen"), Score::NotEnrolled);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WideTable::load(&dir.path().join("nope.csv")).unwrap().is_none());
    }
}
