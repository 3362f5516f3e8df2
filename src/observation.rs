// src/observation.rs
//! Append-only long log of per-course grade readings.
//!
//! One row per (student, course, reading). Rows are never rewritten or
//! deduplicated here; the reconciler reduces them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, info, warn};

use crate::config::consts::{NOT_ENROLLED, TIMESTAMP_FORMAT};
use crate::csv::{HeaderIndex, SEP, parse_rows, split_header};
use crate::error::{Error, Result};
use crate::file::append_rows_with_header;
use crate::identity::CanonicalIdentity;

pub const COL_STUDENT: &str = "student_name";
pub const COL_NAME_A: &str = "localized_name_a";
pub const COL_NAME_B: &str = "localized_name_b";
pub const COL_COURSE: &str = "course_name";
pub const COL_COURSE_LOCALIZED: &str = "course_localized";
pub const COL_SCORE: &str = "score";
pub const COL_GRADE: &str = "grade";
pub const COL_OBSERVED_AT: &str = "observed_at";

pub const LOG_HEADERS: [&str; 8] = [
    COL_STUDENT, COL_NAME_A, COL_NAME_B, COL_COURSE,
    COL_COURSE_LOCALIZED, COL_SCORE, COL_GRADE, COL_OBSERVED_AT,
];

/// A course score, or the "not enrolled" sentinel. `Value(0.0)` is a real zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Score {
    Value(f64),
    NotEnrolled,
}

impl Score {
    /// Empty, `N/A`, `null` and anything non-numeric become `NotEnrolled`.
    pub fn parse(text: &str) -> Score {
        let t = text.trim();
        if t.is_empty() || t.eq_ignore_ascii_case(NOT_ENROLLED) || t.eq_ignore_ascii_case("null") {
            return Score::NotEnrolled;
        }
        match t.parse::<f64>() {
            Ok(v) if v.is_finite() => Score::Value(v),
            _ => Score::NotEnrolled,
        }
    }

    /// Numbers and numeric strings count; `null` and everything else do not.
    pub fn from_json(v: &serde_json::Value) -> Score {
        match v {
            serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map_or(Score::NotEnrolled, Score::Value),
            serde_json::Value::String(s) => Score::parse(s),
            _ => Score::NotEnrolled,
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Score::Value(v) => Some(v),
            Score::NotEnrolled => None,
        }
    }

    pub fn is_enrolled(self) -> bool {
        matches!(self, Score::Value(_))
    }

    pub fn letter_grade(self) -> &'static str {
        match self {
            Score::NotEnrolled => NOT_ENROLLED,
            Score::Value(v) if v >= 90.0 => "A",
            Score::Value(v) if v >= 80.0 => "B",
            Score::Value(v) if v >= 70.0 => "C",
            Score::Value(v) if v >= 60.0 => "D",
            Score::Value(_) => "F",
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Value(v) => write!(f, "{v}"),
            Score::NotEnrolled => f.write_str(NOT_ENROLLED),
        }
    }
}

/// Whole seconds only; the wide table stores no finer precision.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    let ts = NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()?;
    Some(ts.with_nanosecond(0).unwrap_or(ts))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub student: String,
    pub localized_name_a: String,
    pub localized_name_b: String,
    /// Raw LMS course name, section code and term included.
    pub course_name: String,
    pub course_localized: String,
    pub score: Score,
    pub grade: String,
    pub observed_at: NaiveDateTime,
}

impl Observation {
    pub fn new(
        student: &str,
        identity: &CanonicalIdentity,
        course_name: &str,
        course_localized: &str,
        score: Score,
        observed_at: NaiveDateTime,
    ) -> Self {
        Self {
            student: s!(student),
            localized_name_a: identity.localized_name_a.clone(),
            localized_name_b: identity.localized_name_b.clone(),
            course_name: s!(course_name),
            course_localized: s!(course_localized),
            score,
            grade: s!(score.letter_grade()),
            observed_at,
        }
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.student.clone(),
            self.localized_name_a.clone(),
            self.localized_name_b.clone(),
            self.course_name.clone(),
            self.course_localized.clone(),
            self.score.to_string(),
            self.grade.clone(),
            format_timestamp(&self.observed_at),
        ]
    }

    fn from_row(idx: &HeaderIndex<'_>, row: &[String], path: &Path, line: usize) -> Result<Self> {
        let subject = format!("{} line {line}", path.display());
        let student = idx.cell(row, COL_STUDENT).trim();
        let course = idx.cell(row, COL_COURSE).trim();
        if student.is_empty() || course.is_empty() {
            return Err(Error::data(&subject, "observation", "missing student or course name"));
        }
        let raw_ts = idx.cell(row, COL_OBSERVED_AT);
        let observed_at = parse_timestamp(raw_ts)
            .ok_or_else(|| Error::data(&subject, "observation", format!("bad timestamp {raw_ts:?}")))?;
        let score = Score::parse(idx.cell(row, COL_SCORE));
        let grade = match idx.cell(row, COL_GRADE).trim() {
            "" => s!(score.letter_grade()),
            g => s!(g),
        };
        Ok(Self {
            student: s!(student),
            localized_name_a: s!(idx.cell(row, COL_NAME_A).trim()),
            localized_name_b: s!(idx.cell(row, COL_NAME_B).trim()),
            course_name: s!(course),
            course_localized: s!(idx.cell(row, COL_COURSE_LOCALIZED).trim()),
            score,
            grade,
            observed_at,
        })
    }
}

pub struct ObservationStore {
    path: PathBuf,
}

impl ObservationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header goes in only when the log is new or empty. Existing rows are left alone.
    pub fn append(&self, observations: &[Observation]) -> Result<()> {
        if observations.is_empty() { return Ok(()); }
        let headers: Vec<String> = LOG_HEADERS.iter().map(|h| s!(*h)).collect();
        let rows: Vec<Vec<String>> = observations.iter().map(Observation::to_row).collect();
        append_rows_with_header(&self.path, &headers, &rows, SEP)
            .map_err(|e| Error::file(&self.path, "append to", e))?;
        debug!(path = %self.path.display(), rows = rows.len(), "observations appended");
        Ok(())
    }

    /// Every row in file order. A missing log reads as empty.
    pub fn load(&self) -> Result<Vec<Observation>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "observation log not found");
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path).map_err(|e| Error::file(&self.path, "read", e))?;
        let (headers, rows) = split_header(parse_rows(&text, SEP));
        let Some(headers) = headers else { return Ok(Vec::new()) };

        let idx = HeaderIndex::new(&headers);
        for required in [COL_STUDENT, COL_COURSE, COL_OBSERVED_AT] {
            if idx.position(required).is_none() {
                let subject = self.path.display().to_string();
                return Err(Error::data(&subject, "observation", format!("missing column {required}")));
            }
        }

        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            // header is line 1
            out.push(Observation::from_row(&idx, row, &self.path, i + 2)?);
        }
        info!(path = %self.path.display(), rows = out.len(), "observation log loaded");
        Ok(out)
    }
}
