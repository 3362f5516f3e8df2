// src/report/stats.rs
//! Cohort statistics over the latest wide-table rows, with deltas against the
//! previous snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Local;
use serde::Serialize;
use tracing::info;

use super::snapshot::{CourseSnapshot, OverallSnapshot, Snapshot};
use crate::config::ReportSettings;
use crate::config::consts::TIMESTAMP_FORMAT;
use crate::error::{Error, Result};
use crate::store::{WideRecord, WideTable};

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() { None } else { Some(xs.iter().sum::<f64>() / xs.len() as f64) }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 { 0.0 } else { round1(part as f64 * 100.0 / whole as f64) }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CourseStats {
    pub course: String,
    pub student_count: usize,
    pub average_score: f64,
    pub a_count: usize,
    pub a_grade_percent: f64,
    /// `None` when the previous snapshot did not have this course.
    pub average_change: Option<f64>,
    pub a_percent_change: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverallStats {
    pub score_count: usize,
    pub average_score: f64,
    pub a_grade_percent: f64,
    pub average_change: Option<f64>,
    pub a_percent_change: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WatchEntry {
    pub student: String,
    pub localized_name_a: String,
    pub localized_name_b: String,
    pub course: String,
    pub score: f64,
    pub previous: Option<f64>,
    pub change: Option<f64>,
    pub is_new: bool,
    /// Points short of the A threshold (underperforming list only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needed_improvement: Option<f64>,
    /// At-risk list only.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub declining: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriorityStudent {
    pub student: String,
    pub localized_name_a: String,
    pub localized_name_b: String,
    pub underperforming_courses: Vec<String>,
    pub lowest_score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportStats {
    pub generated_at: String,
    pub batch_id: Option<String>,
    pub students: usize,
    pub new_students: Vec<String>,
    pub courses: Vec<CourseStats>,
    pub overall: OverallStats,
    pub underperforming: Vec<WatchEntry>,
    pub at_risk: Vec<WatchEntry>,
    pub top_performers: Vec<WatchEntry>,
    pub priority: Vec<PriorityStudent>,
}

impl ReportStats {
    pub fn course(&self, name: &str) -> Option<&CourseStats> {
        self.courses.iter().find(|c| c.course == name)
    }
}

struct Reading<'r> {
    rec: &'r WideRecord,
    course: &'r str,
    score: f64,
}

/// Build this run's statistics and the snapshot the next run compares against.
/// Only `is_latest` rows count; not-enrolled cells and excluded courses are ignored.
pub fn aggregate(wide_path: &Path, previous: &Snapshot, settings: &ReportSettings) -> Result<(Snapshot, ReportStats)> {
    let Some(table) = WideTable::load(wide_path)? else {
        return Err(Error::file(wide_path, "aggregate report from", "wide table is missing or empty"));
    };
    let latest: Vec<&WideRecord> = table.latest().collect();
    if latest.is_empty() {
        return Err(Error::data(&wide_path.display().to_string(), "wide table", "no latest rows to report on"));
    }
    let courses: Vec<&str> = table.courses.iter()
        .map(String::as_str)
        .filter(|c| !settings.is_excluded(c))
        .collect();

    let readings: Vec<Reading<'_>> = latest.iter()
        .flat_map(|&rec| courses.iter().filter_map(move |&course| {
            rec.score(course).value().map(|score| Reading { rec, course, score })
        }))
        .collect();

    let students: BTreeSet<String> = latest.iter().map(|r| r.student.clone()).collect();
    let new_students: BTreeSet<&str> = if previous.students.is_empty() {
        BTreeSet::new()
    } else {
        students.iter().filter(|s| !previous.students.contains(*s)).map(String::as_str).collect()
    };

    let course_stats = course_stats(&courses, &readings, previous, settings);
    let overall = overall_stats(&readings, previous, settings);

    let entry = |r: &Reading<'_>| {
        let prev = previous.score(&r.rec.student, r.course);
        WatchEntry {
            student: r.rec.student.clone(),
            localized_name_a: r.rec.localized_name_a.clone(),
            localized_name_b: r.rec.localized_name_b.clone(),
            course: s!(r.course),
            score: r.score,
            previous: prev,
            change: prev.map(|p| round1(r.score - p)),
            is_new: new_students.contains(r.rec.student.as_str()),
            needed_improvement: None,
            declining: false,
        }
    };

    let mut underperforming: Vec<WatchEntry> = readings.iter()
        .filter(|r| r.score < settings.a_threshold)
        .map(|r| WatchEntry { needed_improvement: Some(round1(settings.a_threshold - r.score)), ..entry(r) })
        .collect();
    underperforming.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.student.cmp(&b.student)));

    let mut at_risk: Vec<WatchEntry> = readings.iter()
        .filter(|r| r.score >= settings.a_threshold && r.score < settings.at_risk_ceiling)
        .map(|r| {
            let e = entry(r);
            let declining = e.previous.is_some_and(|p| p >= settings.at_risk_ceiling)
                || e.change.is_some_and(|c| c < 0.0);
            WatchEntry { declining, ..e }
        })
        .collect();
    at_risk.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.student.cmp(&b.student)));

    let mut top_performers: Vec<WatchEntry> = readings.iter()
        .filter(|r| r.score >= settings.top_performer_floor)
        .map(|r| entry(r))
        .collect();
    top_performers.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.student.cmp(&b.student)));

    let priority = priority_students(&latest, &readings, settings);

    let batch_id = latest.iter().map(|r| &r.batch_id).max().map(|b| b.to_string());
    let now = Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string();

    let snapshot = Snapshot {
        taken_at: Some(now.clone()),
        batch_id: batch_id.clone(),
        students: students.clone(),
        courses: course_stats.iter()
            .map(|c| (c.course.clone(), CourseSnapshot {
                student_count: c.student_count,
                average_score: c.average_score,
                a_grade_percent: c.a_grade_percent,
            }))
            .collect(),
        student_scores: {
            let mut m: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
            for r in &readings {
                m.entry(r.rec.student.clone()).or_default().insert(s!(r.course), r.score);
            }
            m
        },
        overall: Some(OverallSnapshot {
            average_score: overall.average_score,
            a_grade_percent: overall.a_grade_percent,
        }),
    };

    let stats = ReportStats {
        generated_at: now,
        batch_id,
        students: students.len(),
        new_students: new_students.iter().map(|s| s!(*s)).collect(),
        courses: course_stats,
        overall,
        underperforming,
        at_risk,
        top_performers,
        priority,
    };
    info!(
        students = stats.students,
        courses = stats.courses.len(),
        underperforming = stats.underperforming.len(),
        at_risk = stats.at_risk.len(),
        "report aggregated"
    );
    Ok((snapshot, stats))
}

fn course_stats(courses: &[&str], readings: &[Reading<'_>], previous: &Snapshot, settings: &ReportSettings) -> Vec<CourseStats> {
    let mut out: Vec<CourseStats> = courses.iter()
        .filter_map(|&course| {
            let scores: Vec<f64> = readings.iter().filter(|r| r.course == course).map(|r| r.score).collect();
            let avg = mean(&scores)?;
            let a_count = scores.iter().filter(|&&s| s >= settings.a_threshold).count();
            let average_score = round1(avg);
            let a_grade_percent = percent(a_count, scores.len());
            let prev = previous.courses.get(course);
            Some(CourseStats {
                course: s!(course),
                student_count: scores.len(),
                average_score,
                a_count,
                a_grade_percent,
                average_change: prev.map(|p| round1(average_score - p.average_score)),
                a_percent_change: prev.map(|p| round1(a_grade_percent - p.a_grade_percent)),
            })
        })
        .collect();
    out.sort_by(|a, b| b.a_grade_percent.total_cmp(&a.a_grade_percent).then_with(|| a.course.cmp(&b.course)));
    out
}

fn overall_stats(readings: &[Reading<'_>], previous: &Snapshot, settings: &ReportSettings) -> OverallStats {
    let scores: Vec<f64> = readings.iter().map(|r| r.score).collect();
    let average_score = mean(&scores).map(round1).unwrap_or(0.0);
    let a_count = scores.iter().filter(|&&s| s >= settings.a_threshold).count();
    let a_grade_percent = percent(a_count, scores.len());
    let prev = previous.overall.as_ref();
    OverallStats {
        score_count: scores.len(),
        average_score,
        a_grade_percent,
        average_change: prev.map(|p| round1(average_score - p.average_score)),
        a_percent_change: prev.map(|p| round1(a_grade_percent - p.a_grade_percent)),
    }
}

/// Underperforming in several courses, or anything below the very-low line.
fn priority_students(latest: &[&WideRecord], readings: &[Reading<'_>], settings: &ReportSettings) -> Vec<PriorityStudent> {
    let mut out: Vec<PriorityStudent> = latest.iter()
        .filter_map(|rec| {
            let mine: Vec<&Reading<'_>> = readings.iter().filter(|r| std::ptr::eq(r.rec, *rec)).collect();
            let under: Vec<String> = mine.iter()
                .filter(|r| r.score < settings.a_threshold)
                .map(|r| s!(r.course))
                .collect();
            let lowest = mine.iter().map(|r| r.score).min_by(f64::total_cmp)?;
            let flagged = under.len() >= settings.priority_course_count || lowest < settings.very_low_score;
            flagged.then(|| PriorityStudent {
                student: rec.student.clone(),
                localized_name_a: rec.localized_name_a.clone(),
                localized_name_b: rec.localized_name_b.clone(),
                underperforming_courses: under,
                lowest_score: lowest,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        b.underperforming_courses.len().cmp(&a.underperforming_courses.len())
            .then_with(|| a.lowest_score.total_cmp(&b.lowest_score))
            .then_with(|| a.student.cmp(&b.student))
    });
    out
}
