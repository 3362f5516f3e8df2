// src/runner.rs
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::{
    batch::{BatchId, RunContext},
    collect::{GradeSource, observations_for},
    config::AppConfig,
    credentials::CredentialStore,
    error::Result,
    file::is_missing_or_empty,
    identity::IdentityResolver,
    observation::ObservationStore,
    progress::Progress,
    reconcile::{ReconcileSummary, Reconciler},
    report::{ReportStats, Snapshot, aggregate, write_report},
};

/// Summary of one scheduled run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub batch_id: Option<BatchId>,
    pub students_total: usize,
    pub students_processed: usize,
    pub students_failed: usize,
    /// (student key, reason) for every skipped student.
    pub failures: Vec<(String, String)>,
    pub records_added: usize,
    pub reconcile: ReconcileSummary,
    pub report: Option<PathBuf>,
}

impl RunSummary {
    pub fn success_rate(&self) -> f64 {
        if self.students_total == 0 { return 0.0; }
        self.students_processed as f64 * 100.0 / self.students_total as f64
    }
}

/// Fetch every student, append to the log, reconcile, then report.
///
/// A student whose credentials or fetch fail is logged and skipped. Failing to
/// write the log, reconcile or report aborts the run. `Progress::finish` is
/// called either way.
pub fn run(
    config: &AppConfig,
    ctx: &RunContext,
    resolver: &IdentityResolver,
    students: &CredentialStore,
    source: &dyn GradeSource,
    mut progress: Option<&mut dyn Progress>,
) -> Result<RunSummary> {
    let result = run_steps(config, ctx, resolver, students, source, &mut progress);
    if let Some(p) = progress.as_deref_mut() {
        p.finish();
    }
    if let Err(e) = &result {
        error!("run aborted: {e}");
    }
    result
}

fn run_steps(
    config: &AppConfig,
    ctx: &RunContext,
    resolver: &IdentityResolver,
    students: &CredentialStore,
    source: &dyn GradeSource,
    progress: &mut Option<&mut dyn Progress>,
) -> Result<RunSummary> {
    let store = ObservationStore::new(&config.paths.observation_log);
    let mut summary = RunSummary { students_total: students.len(), ..Default::default() };

    info!(students = students.len(), source = source.name(), "run started");
    if let Some(p) = progress.as_deref_mut() {
        p.begin(students.len());
    }

    for cred in students.students() {
        let fetched = cred.validate().and_then(|()| source.fetch(cred));
        let grades = match fetched {
            Ok(g) => g,
            Err(e) => {
                error!(student = %cred.key, "skipped: {e}");
                summary.students_failed += 1;
                summary.failures.push((cred.key.clone(), e.to_string()));
                if let Some(p) = progress.as_deref_mut() {
                    p.item_failed(&cred.key, &e.to_string());
                }
                continue;
            }
        };

        let observations = observations_for(&grades, &config.registry, resolver, ctx.started_at);
        if observations.is_empty() {
            warn!(student = %cred.key, "no in-scope courses");
        }
        store.append(&observations)?;
        summary.students_processed += 1;
        summary.records_added += observations.len();
        if let Some(p) = progress.as_deref_mut() {
            p.item_done(&cred.key, observations.len());
        }
    }

    if let Some(p) = progress.as_deref_mut() {
        p.log("Reconciling wide table...");
    }
    let reconciler = Reconciler::new(&config.registry, resolver, ctx);
    summary.reconcile = reconciler.reconcile(&config.paths.observation_log, &config.paths.wide_table)?;
    summary.batch_id = ctx.batch.assigned().cloned();

    if is_missing_or_empty(&config.paths.wide_table) {
        warn!(path = %config.paths.wide_table.display(), "no wide table yet; report skipped");
    } else {
        if let Some(p) = progress.as_deref_mut() {
            p.log("Aggregating report...");
        }
        report(config, true)?;
        summary.report = Some(config.paths.report.clone());
    }

    info!(
        processed = summary.students_processed,
        failed = summary.students_failed,
        records = summary.records_added,
        "run finished"
    );
    Ok(summary)
}

/// Aggregate against the cached snapshot and write the report JSON.
/// With `save_snapshot`, the cache moves forward to this report.
pub fn report(config: &AppConfig, save_snapshot: bool) -> Result<ReportStats> {
    let previous = Snapshot::load(&config.paths.snapshot);
    let (snapshot, stats) = aggregate(&config.paths.wide_table, &previous, &config.report)?;
    write_report(&stats, &config.paths.report)?;
    if save_snapshot {
        snapshot.save(&config.paths.snapshot)?;
    }
    Ok(stats)
}
