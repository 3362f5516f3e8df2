// src/config/registry.rs
//! Static course registry: raw LMS course name → localized name + wide-table column.
//!
//! The registry is configuration, not code. It also carries the term marker
//! (e.g. `"(2025S-"`) that decides which fetched courses are in scope for a cycle.

use serde::{Deserialize, Serialize};

use crate::core::sanitize::course_title;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEntry {
    /// Course name exactly as the LMS returns it.
    pub raw: String,
    pub localized: String,
    /// Wide-table column; defaults to the course title (name before " - ").
    #[serde(default)]
    pub column: Option<String>,
}

impl CourseEntry {
    pub fn column(&self) -> String {
        match &self.column {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => course_title(&self.raw),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRegistry {
    #[serde(default)]
    pub term_marker: Option<String>,
    #[serde(default, rename = "course")]
    pub courses: Vec<CourseEntry>,
}

impl CourseRegistry {
    pub fn new(term_marker: Option<&str>, courses: Vec<CourseEntry>) -> Self {
        Self { term_marker: term_marker.map(String::from), courses }
    }

    fn entry(&self, raw: &str) -> Option<&CourseEntry> {
        self.courses.iter().find(|c| c.raw == raw)
    }

    /// Every registered column, registry order, duplicates dropped.
    pub fn columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.courses.len());
        for c in &self.courses {
            let col = c.column();
            if !out.contains(&col) { out.push(col); }
        }
        out
    }

    /// Column for a raw course name; unregistered courses still get a column.
    pub fn column_for(&self, raw: &str) -> String {
        self.entry(raw).map(CourseEntry::column).unwrap_or_else(|| course_title(raw))
    }

    pub fn localize(&self, raw: &str) -> Option<&str> {
        self.entry(raw).map(|c| c.localized.as_str())
    }

    /// Substring match against the term marker; everything is in scope without one.
    pub fn in_scope(&self, raw: &str) -> bool {
        match self.term_marker.as_deref() {
            Some(m) if !m.is_empty() => raw.contains(m),
            _ => true,
        }
    }
}
