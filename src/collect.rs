// src/collect.rs
//! Where grade readings come from.
//!
//! `GradeSource` is the seam for a live LMS client. `FeedSource` reads one
//! JSON document per student from a directory, which is what scheduled runs
//! and tests use.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use crate::config::CourseRegistry;
use crate::config::consts::UNKNOWN_COURSE;
use crate::core::sanitize::file_stem_for;
use crate::credentials::StudentCredential;
use crate::error::{Error, Result};
use crate::identity::IdentityResolver;
use crate::observation::{Observation, Score};

#[derive(Clone, Debug, PartialEq)]
pub struct CourseReading {
    pub name: String,
    pub score: Score,
}

/// Everything one fetch returns for a student.
#[derive(Clone, Debug, PartialEq)]
pub struct StudentGrades {
    pub display_name: String,
    pub courses: Vec<CourseReading>,
}

pub trait GradeSource {
    /// Short label for logs.
    fn name(&self) -> &str;
    fn fetch(&self, student: &StudentCredential) -> Result<StudentGrades>;
}

#[derive(Deserialize)]
struct FeedDoc {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    courses: Vec<FeedCourse>,
}

#[derive(Deserialize)]
struct FeedCourse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    score: serde_json::Value,
}

/// `<dir>/<student key>.json`:
/// `{"display_name": "...", "courses": [{"name": "...", "score": 91.5}]}`
pub struct FeedSource {
    dir: PathBuf,
}

impl FeedSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for(key)))
    }

    fn parse(path: &Path, student: &StudentCredential, text: &str) -> Result<StudentGrades> {
        let doc: FeedDoc = serde_json::from_str(text)
            .map_err(|e| Error::data(&student.key, "grade feed", format!("{}: {e}", path.display())))?;
        let display_name = doc.display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| s!(student.display_name()));
        let courses = doc.courses.into_iter()
            .map(|c| CourseReading {
                name: c.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| s!(UNKNOWN_COURSE)),
                score: Score::from_json(&c.score),
            })
            .collect();
        Ok(StudentGrades { display_name, courses })
    }
}

impl GradeSource for FeedSource {
    fn name(&self) -> &str {
        "feed"
    }

    fn fetch(&self, student: &StudentCredential) -> Result<StudentGrades> {
        let path = self.path_for(&student.key);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::api(&student.key, &path.display().to_string(), e))?;
        let grades = Self::parse(&path, student, &text)?;
        debug!(student = %student.key, courses = grades.courses.len(), "feed read");
        Ok(grades)
    }
}

/// In-scope courses only, localized, identity resolved, one shared timestamp.
pub fn observations_for(
    grades: &StudentGrades,
    registry: &CourseRegistry,
    resolver: &IdentityResolver,
    observed_at: NaiveDateTime,
) -> Vec<Observation> {
    let identity = resolver.resolve(&grades.display_name);
    grades.courses.iter()
        .filter(|c| registry.in_scope(&c.name))
        .map(|c| {
            let localized = registry.localize(&c.name).unwrap_or(&c.name);
            Observation::new(&grades.display_name, &identity, &c.name, localized, c.score, observed_at)
        })
        .collect()
}
