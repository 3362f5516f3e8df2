// tests/reconcile_merge.rs
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

use grade_sync::batch::{BatchId, RunContext};
use grade_sync::config::{CourseEntry, CourseRegistry};
use grade_sync::error::Error;
use grade_sync::identity::{CanonicalIdentity, IdentityEntry, IdentityResolver};
use grade_sync::observation::{Observation, ObservationStore, Score};
use grade_sync::reconcile::{Reconciler, export_latest};
use grade_sync::store::{WideRecord, WideTable};

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
}

fn registry(columns: &[&str]) -> CourseRegistry {
    CourseRegistry::new(None, columns.iter().map(|c| CourseEntry {
        raw: format!("{c} - S0001 (2025S-X)"),
        localized: format!("{c} (zh)"),
        column: None,
    }).collect())
}

fn raw(course: &str) -> String {
    format!("{course} - S0001 (2025S-X)")
}

fn obs(student: &str, course: &str, score: Score, when: NaiveDateTime) -> Observation {
    Observation::new(student, &CanonicalIdentity::default(), &raw(course), "", score, when)
}

struct Fixture {
    _dir: tempfile::TempDir,
    log: PathBuf,
    wide: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("data").join("grades.csv");
        let wide = dir.path().join("data").join("grades_wide.csv");
        Self { _dir: dir, log, wide }
    }

    fn append(&self, rows: &[Observation]) {
        ObservationStore::new(&self.log).append(rows).unwrap();
    }

    fn table(&self) -> WideTable {
        WideTable::load(&self.wide).unwrap().unwrap()
    }
}

fn reconcile(fx: &Fixture, reg: &CourseRegistry, when: NaiveDateTime) -> grade_sync::reconcile::ReconcileSummary {
    let resolver = IdentityResolver::default();
    let ctx = RunContext::at(when);
    Reconciler::new(reg, &resolver, &ctx).reconcile(&fx.log, &fx.wide).unwrap()
}

fn rows_for<'t>(t: &'t WideTable, student: &str) -> Vec<&'t WideRecord> {
    t.records.iter().filter(|r| r.student == student).collect()
}

fn latest_count(t: &WideTable, student: &str) -> usize {
    rows_for(t, student).iter().filter(|r| r.is_latest).count()
}

fn old_row(student: &str, scores: &[(&str, f64)], batch: &str) -> WideRecord {
    WideRecord {
        student: student.to_string(),
        localized_name_a: String::new(),
        localized_name_b: String::new(),
        is_latest: true,
        scores: scores.iter().map(|(c, v)| (c.to_string(), Score::Value(*v))).collect::<HashMap<_, _>>(),
        observed_at: at(1, 7, 0),
        batch_id: BatchId::from_stored(batch),
    }
}

#[test]
fn alice_and_bob_land_in_one_new_batch() {
    let fx = Fixture::new();
    let reg = registry(&["Course A", "Course B"]);

    let mut prior = WideTable::new(vec!["Course A".into(), "Course B".into()]);
    prior.records.push(old_row("Alice", &[("Course A", 80.0)], "250301-0700"));
    prior.records.push(old_row("Bob", &[("Course B", 60.0)], "250301-0700"));
    prior.save(&fx.wide).unwrap();

    fx.append(&[
        obs("Alice", "Course A", Score::Value(95.0), at(2, 8, 0)),
        obs("Bob", "Course B", Score::Value(70.0), at(2, 8, 0)),
        obs("Alice", "Course A", Score::Value(91.0), at(2, 9, 0)),
    ]);
    let summary = reconcile(&fx, &reg, at(2, 9, 30));
    assert_eq!(summary.rows_added, 2);
    assert_eq!(summary.batch_id.as_ref().map(|b| b.as_str()), Some("250302-0930"));

    let t = fx.table();
    let fresh: Vec<&WideRecord> = t.records.iter().filter(|r| r.batch_id.as_str() == "250302-0930").collect();
    assert_eq!(fresh.len(), 2);

    let alice = fresh.iter().find(|r| r.student == "Alice").unwrap();
    assert_eq!(alice.score("Course A"), Score::Value(91.0));
    assert_eq!(alice.score("Course B"), Score::NotEnrolled);
    assert!(alice.is_latest);
    assert_eq!(alice.observed_at, at(2, 9, 0));

    let bob = fresh.iter().find(|r| r.student == "Bob").unwrap();
    assert_eq!(bob.score("Course A"), Score::NotEnrolled);
    assert_eq!(bob.score("Course B"), Score::Value(70.0));
    assert!(bob.is_latest);

    for r in t.records.iter().filter(|r| r.batch_id.as_str() == "250301-0700") {
        assert!(!r.is_latest, "{} kept an old latest flag", r.student);
    }
}

#[test]
fn second_run_without_new_data_changes_nothing() {
    let fx = Fixture::new();
    let reg = registry(&["Course A", "Course B"]);
    fx.append(&[
        obs("Alice", "Course A", Score::Value(95.0), at(1, 8, 0)),
        obs("Bob", "Course B", Score::Value(70.0), at(1, 8, 0)),
    ]);

    reconcile(&fx, &reg, at(1, 8, 30));
    let first = fs::read_to_string(&fx.wide).unwrap();

    // later minute, then the very same minute (collision path)
    let later = reconcile(&fx, &reg, at(1, 9, 0));
    assert_eq!(later.rows_added, 0);
    assert_eq!(later.rows_stale, 2);
    let same_minute = reconcile(&fx, &reg, at(1, 8, 30));
    assert_eq!(same_minute.rows_added, 0);

    assert_eq!(fs::read_to_string(&fx.wide).unwrap(), first);
    let t = fx.table();
    assert_eq!(t.records.len(), 2);
    assert_eq!(latest_count(&t, "Alice"), 1);
    assert_eq!(latest_count(&t, "Bob"), 1);
}

#[test]
fn fractional_second_stamps_do_not_duplicate_rows() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    fs::create_dir_all(fx.log.parent().unwrap()).unwrap();
    fs::write(&fx.log, format!(
        "{}\nAlice,,,{},,91,A,2025-03-01 08:00:00.250\n",
        grade_sync::observation::LOG_HEADERS.join(","),
        raw("Course A"),
    )).unwrap();

    for m in [30, 31, 32] {
        reconcile(&fx, &reg, at(1, 8, m));
    }
    let t = fx.table();
    assert_eq!(t.records.len(), 1);
    assert_eq!(t.records[0].observed_at, at(1, 8, 0));
}

#[test]
fn older_log_never_regresses_a_newer_latest_row() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    let mut prior = WideTable::new(vec!["Course A".into()]);
    let mut newer = old_row("Alice", &[("Course A", 95.0)], "250305-0800");
    newer.observed_at = at(5, 8, 0);
    prior.records.push(newer);
    prior.save(&fx.wide).unwrap();

    fx.append(&[obs("Alice", "Course A", Score::Value(70.0), at(1, 8, 0))]);
    let s = reconcile(&fx, &reg, at(6, 8, 0));
    assert_eq!(s.rows_added, 0);
    assert_eq!(s.rows_stale, 1);

    let t = fx.table();
    assert_eq!(t.records.len(), 1);
    let latest: Vec<&WideRecord> = t.latest().collect();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].score("Course A"), Score::Value(95.0));
    assert_eq!(latest[0].observed_at, at(5, 8, 0));
}

#[test]
fn later_reading_wins_even_when_logged_earlier() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    fx.append(&[
        obs("Alice", "Course A", Score::Value(91.0), at(1, 10, 0)),
        obs("Alice", "Course A", Score::Value(95.0), at(1, 9, 0)),
    ]);
    reconcile(&fx, &reg, at(1, 11, 0));
    let t = fx.table();
    assert_eq!(t.records[0].score("Course A"), Score::Value(91.0));
}

#[test]
fn zero_is_not_the_not_enrolled_sentinel() {
    let fx = Fixture::new();
    let reg = registry(&["Course A", "Course B"]);
    fx.append(&[
        obs("Alice", "Course A", Score::Value(0.0), at(1, 8, 0)),
        obs("Alice", "Course B", Score::parse(""), at(1, 8, 0)),
    ]);
    reconcile(&fx, &reg, at(1, 8, 30));

    let text = fs::read_to_string(&fx.wide).unwrap();
    let data_line = text.lines().nth(1).unwrap();
    assert!(data_line.contains(",0,N/A,"), "row was {data_line}");

    let t = fx.table();
    assert_eq!(t.records[0].score("Course A"), Score::Value(0.0));
    assert_eq!(t.records[0].score("Course B"), Score::NotEnrolled);
}

#[test]
fn columns_never_shrink_and_registry_growth_reaches_old_rows() {
    let fx = Fixture::new();
    fx.append(&[obs("Alice", "Course A", Score::Value(90.0), at(1, 8, 0))]);
    reconcile(&fx, &registry(&["Course A"]), at(1, 8, 30));
    assert_eq!(fx.table().courses, vec!["Course A"]);

    // new course registered; nothing new observed
    reconcile(&fx, &registry(&["Course A", "Course C"]), at(1, 9, 0));
    let t = fx.table();
    assert_eq!(t.courses, vec!["Course A", "Course C"]);
    assert_eq!(t.records.len(), 1);
    assert_eq!(t.records[0].score("Course C"), Score::NotEnrolled);
    let header = fs::read_to_string(&fx.wide).unwrap().lines().next().unwrap().to_string();
    assert_eq!(header, "student_name,localized_name_a,localized_name_b,is_latest,Course A,Course C,observed_at,batch_id");

    // Course A retired from the registry; its column stays
    fx.append(&[obs("Alice", "Course C", Score::Value(88.0), at(2, 8, 0))]);
    reconcile(&fx, &registry(&["Course C"]), at(2, 8, 30));
    let t = fx.table();
    assert!(t.courses.contains(&"Course A".to_string()));
    assert_eq!(t.records.len(), 2);
    let latest: Vec<&WideRecord> = t.latest().collect();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].score("Course A"), Score::Value(90.0));
    assert_eq!(latest[0].score("Course C"), Score::Value(88.0));
}

#[test]
fn unregistered_courses_get_their_own_column() {
    let fx = Fixture::new();
    fx.append(&[obs("Alice", "Music Appreciation", Score::Value(99.0), at(1, 8, 0))]);
    reconcile(&fx, &registry(&["Course A"]), at(1, 8, 30));
    let t = fx.table();
    assert_eq!(t.courses, vec!["Course A", "Music Appreciation"]);
}

#[test]
fn absent_student_keeps_latest_row() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    let mut prior = WideTable::new(vec!["Course A".into()]);
    prior.records.push(old_row("Carol", &[("Course A", 77.0)], "250301-0700"));
    prior.save(&fx.wide).unwrap();

    fx.append(&[obs("Alice", "Course A", Score::Value(93.0), at(1, 8, 0))]);
    reconcile(&fx, &reg, at(1, 8, 30));

    let t = fx.table();
    assert_eq!(latest_count(&t, "Carol"), 1);
    assert_eq!(latest_count(&t, "Alice"), 1);
}

#[test]
fn batch_id_collision_is_suffixed() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    let mut prior = WideTable::new(vec!["Course A".into()]);
    prior.records.push(old_row("Alice", &[("Course A", 70.0)], "250301-0830"));
    prior.save(&fx.wide).unwrap();

    fx.append(&[obs("Alice", "Course A", Score::Value(75.0), at(1, 8, 29))]);
    let s = reconcile(&fx, &reg, at(1, 8, 30));
    assert_eq!(s.batch_id.unwrap().as_str(), "250301-0830-002");

    let t = fx.table();
    assert_eq!(t.records.len(), 2);
    assert_eq!(latest_count(&t, "Alice"), 1);
    assert!(t.latest().all(|r| r.batch_id.as_str() == "250301-0830-002"));
}

#[test]
fn same_batch_row_is_replaced_not_duplicated() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    let resolver = IdentityResolver::default();
    let ctx = RunContext::at(at(1, 8, 30));
    let reconciler = Reconciler::new(&reg, &resolver, &ctx);

    fx.append(&[obs("Alice", "Course A", Score::Value(80.0), at(1, 8, 0))]);
    reconciler.reconcile(&fx.log, &fx.wide).unwrap();
    fx.append(&[obs("Alice", "Course A", Score::Value(85.0), at(1, 8, 10))]);
    let s = reconciler.reconcile(&fx.log, &fx.wide).unwrap();
    assert_eq!(s.rows_replaced, 1);

    let t = fx.table();
    assert_eq!(t.records.len(), 1);
    assert_eq!(t.records[0].score("Course A"), Score::Value(85.0));
    assert!(t.records[0].is_latest);
}

#[test]
fn identity_comes_from_resolver_then_from_the_log() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    let resolver = IdentityResolver::new(&[IdentityEntry {
        display_name: "Alice".into(),
        localized_name_a: "艾丽丝".into(),
        localized_name_b: "Alice W".into(),
        aliases: vec![],
    }], &[]);
    let carried = CanonicalIdentity::new("鲍勃", "Bob");
    fx.append(&[
        obs("Alice", "Course A", Score::Value(90.0), at(1, 8, 0)),
        Observation::new("Bob", &carried, &raw("Course A"), "", Score::Value(80.0), at(1, 8, 0)),
    ]);
    let ctx = RunContext::at(at(1, 8, 30));
    Reconciler::new(&reg, &resolver, &ctx).reconcile(&fx.log, &fx.wide).unwrap();

    let t = fx.table();
    let alice = rows_for(&t, "Alice")[0];
    assert_eq!(alice.localized_name_a, "艾丽丝");
    let bob = rows_for(&t, "Bob")[0];
    assert_eq!((bob.localized_name_a.as_str(), bob.localized_name_b.as_str()), ("鲍勃", "Bob"));
}

#[test]
fn empty_log_is_a_no_op() {
    let fx = Fixture::new();
    let s = reconcile(&fx, &registry(&["Course A"]), at(1, 8, 30));
    assert_eq!(s.rows_total, 0);
    assert!(s.batch_id.is_none());
    assert!(!fx.wide.exists());
}

#[test]
fn failures_surface_as_file_operation_on_the_wide_table() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.log.parent().unwrap()).unwrap();
    fs::write(&fx.log, "student_name,course_name,score,observed_at\nAlice,Course A,90,not a time\n").unwrap();

    let resolver = IdentityResolver::default();
    let ctx = RunContext::at(at(1, 8, 30));
    let err = Reconciler::new(&registry(&[]), &resolver, &ctx)
        .reconcile(&fx.log, &fx.wide)
        .unwrap_err();
    match err {
        Error::FileOperation { path, .. } => assert_eq!(path, fx.wide),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn backfill_fills_only_empty_fields_and_keeps_a_backup() {
    let fx = Fixture::new();
    let mut prior = WideTable::new(vec!["Course A".into()]);
    prior.records.push(old_row("Alice", &[("Course A", 90.0)], "250301-0700"));
    let mut named = old_row("Bob", &[("Course A", 80.0)], "250301-0700");
    named.localized_name_a = "自定".into();
    prior.records.push(named);
    prior.save(&fx.wide).unwrap();

    let resolver = IdentityResolver::new(&[
        IdentityEntry { display_name: "Alice".into(), localized_name_a: "艾丽丝".into(), localized_name_b: "Alice W".into(), aliases: vec![] },
        IdentityEntry { display_name: "Bob".into(), localized_name_a: "鲍勃".into(), localized_name_b: "Bob K".into(), aliases: vec![] },
    ], &[]);
    let ctx = RunContext::at(at(1, 8, 30));
    let s = Reconciler::new(&registry(&["Course A"]), &resolver, &ctx)
        .backfill_identities(&fx.wide)
        .unwrap();

    assert_eq!((s.missing_a_before, s.missing_b_before), (1, 2));
    assert_eq!((s.missing_a_after, s.missing_b_after), (0, 0));
    assert_eq!(s.fixed(), 3);
    assert!(s.backup.as_deref().is_some_and(Path::exists));

    let t = fx.table();
    let bob = rows_for(&t, "Bob")[0];
    assert_eq!(bob.localized_name_a, "自定");
    assert_eq!(bob.localized_name_b, "Bob K");
}

#[test]
fn export_latest_writes_only_current_rows() {
    let fx = Fixture::new();
    let reg = registry(&["Course A"]);
    fx.append(&[obs("Alice", "Course A", Score::Value(80.0), at(1, 8, 0))]);
    reconcile(&fx, &reg, at(1, 8, 30));
    fx.append(&[obs("Alice", "Course A", Score::Value(84.0), at(2, 8, 0))]);
    reconcile(&fx, &reg, at(2, 8, 30));
    assert_eq!(fx.table().records.len(), 2);

    let out = fx.wide.with_file_name("latest.csv");
    assert_eq!(export_latest(&fx.wide, &out).unwrap(), 1);
    let exported = WideTable::load(&out).unwrap().unwrap();
    assert_eq!(exported.records[0].score("Course A"), Score::Value(84.0));
}
