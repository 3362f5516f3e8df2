// src/reconcile.rs
//! Long observation log → wide table, merged into the persisted history.
//!
//! Each run reduces the log to the last reading per (student, raw course),
//! pivots that into one row per student tagged with the run's batch id, and
//! merges those rows into the stored table. History is never deleted. After a
//! successful merge every student has exactly one `is_latest` row.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::batch::{BatchId, RunContext};
use crate::config::CourseRegistry;
use crate::error::{Error, Result};
use crate::file::backup_copy;
use crate::identity::IdentityResolver;
use crate::observation::{Observation, ObservationStore, Score};
use crate::store::{WideRecord, WideTable};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub batch_id: Option<BatchId>,
    pub observations: usize,
    /// Students with at least one reading in this run.
    pub students: usize,
    pub rows_added: usize,
    pub rows_replaced: usize,
    /// Rows no newer than the student's current latest row, not written.
    pub rows_stale: usize,
    pub rows_total: usize,
    pub courses: usize,
    pub identities_backfilled: usize,
    /// Students whose latest flag had to be repaired after the merge.
    pub latest_repaired: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub rows: usize,
    pub missing_a_before: usize,
    pub missing_b_before: usize,
    pub missing_a_after: usize,
    pub missing_b_after: usize,
    pub backup: Option<PathBuf>,
}

impl BackfillSummary {
    pub fn fixed(&self) -> usize {
        (self.missing_a_before - self.missing_a_after) + (self.missing_b_before - self.missing_b_after)
    }
}

pub struct Reconciler<'a> {
    registry: &'a CourseRegistry,
    resolver: &'a IdentityResolver,
    ctx: &'a RunContext,
}

/// Last reading per (student, raw course); later `observed_at` wins, log order breaks ties.
pub fn reduce_latest(observations: &[Observation]) -> Vec<&Observation> {
    let mut ordered: Vec<&Observation> = observations.iter().collect();
    ordered.sort_by_key(|o| o.observed_at); // stable
    let mut last: BTreeMap<(&str, &str), &Observation> = BTreeMap::new();
    for o in ordered {
        last.insert((o.student.as_str(), o.course_name.as_str()), o);
    }
    let mut out: Vec<&Observation> = last.into_values().collect();
    out.sort_by(|a, b| a.student.cmp(&b.student).then(a.observed_at.cmp(&b.observed_at)));
    out
}

/// Fill empty identity fields only. True when anything changed.
fn fill_identity(rec: &mut WideRecord, resolver: &IdentityResolver) -> bool {
    if !rec.identity_missing() { return false; }
    let id = resolver.resolve(&rec.student);
    let mut changed = false;
    if rec.localized_name_a.is_empty() && !id.localized_name_a.is_empty() {
        rec.localized_name_a = id.localized_name_a;
        changed = true;
    }
    if rec.localized_name_b.is_empty() && !id.localized_name_b.is_empty() {
        rec.localized_name_b = id.localized_name_b;
        changed = true;
    }
    changed
}

/// Exactly one latest row per student; the greatest batch id wins.
/// Returns how many students needed fixing.
pub fn enforce_single_latest(table: &mut WideTable) -> usize {
    let mut by_student: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, r) in table.records.iter().enumerate() {
        by_student.entry(r.student.as_str()).or_default().push(i);
    }

    let mut fixes: Vec<(usize, Vec<usize>)> = Vec::new();
    for rows in by_student.into_values() {
        let flagged = rows.iter().filter(|&&i| table.records[i].is_latest).count();
        if flagged == 1 { continue; }
        // max_by_key keeps the last of equal keys, so file order breaks ties
        let Some(&winner) = rows.iter().max_by_key(|&&i| &table.records[i].batch_id) else { continue };
        fixes.push((winner, rows));
    }

    let repaired = fixes.len();
    for (winner, rows) in fixes {
        warn!(student = %table.records[winner].student, batch_id = %table.records[winner].batch_id, "latest flag repaired");
        for i in rows {
            table.records[i].is_latest = i == winner;
        }
    }
    repaired
}

impl<'a> Reconciler<'a> {
    pub fn new(registry: &'a CourseRegistry, resolver: &'a IdentityResolver, ctx: &'a RunContext) -> Self {
        Self { registry, resolver, ctx }
    }

    /// Merge the observation log into the wide table at `wide_path`.
    /// Any failure comes back as a single `FileOperation` error on `wide_path`.
    pub fn reconcile(&self, log_path: &Path, wide_path: &Path) -> Result<ReconcileSummary> {
        self.reconcile_inner(log_path, wide_path)
            .map_err(|e| e.into_file_error(wide_path, "reconcile into"))
    }

    fn reconcile_inner(&self, log_path: &Path, wide_path: &Path) -> Result<ReconcileSummary> {
        let observations = ObservationStore::new(log_path).load()?;
        if observations.is_empty() {
            warn!(path = %log_path.display(), "observation log is empty; nothing to reconcile");
            return Ok(ReconcileSummary::default());
        }

        let old = WideTable::load(wide_path)?;
        let batch = match &old {
            Some(t) => self.ctx.batch.current_batch_id(&t.batch_ids()).clone(),
            None => self.ctx.batch.current_batch_id(&Default::default()).clone(),
        };
        let existing_courses = old.as_ref().map(|t| t.courses.as_slice()).unwrap_or(&[]);
        let fresh = self.build_wide(&observations, &batch, existing_courses);

        let mut summary = ReconcileSummary {
            batch_id: Some(batch),
            observations: observations.len(),
            students: fresh.records.len(),
            ..Default::default()
        };
        let merged = self.merge(old, fresh, &mut summary);
        merged.save(wide_path)?;

        summary.rows_total = merged.records.len();
        summary.courses = merged.courses.len();
        info!(
            path = %wide_path.display(),
            added = summary.rows_added,
            replaced = summary.rows_replaced,
            stale = summary.rows_stale,
            total = summary.rows_total,
            "reconcile complete"
        );
        Ok(summary)
    }

    /// Column order: what the stored table already has, then the registry,
    /// then observed courses the registry does not know (sorted).
    fn columns(&self, reduced: &[&Observation], existing: &[String]) -> Vec<String> {
        let mut cols: Vec<String> = existing.to_vec();
        for c in self.registry.columns() {
            if !cols.contains(&c) { cols.push(c); }
        }
        let mut unregistered: Vec<String> = reduced.iter()
            .map(|o| self.registry.column_for(&o.course_name))
            .filter(|c| !cols.contains(c))
            .collect();
        unregistered.sort();
        unregistered.dedup();
        if !unregistered.is_empty() {
            debug!(columns = ?unregistered, "unregistered course columns added");
        }
        cols.extend(unregistered);
        cols
    }

    /// One fresh row per observed student, all tagged `batch` and flagged latest.
    pub fn build_wide(&self, observations: &[Observation], batch: &BatchId, existing_courses: &[String]) -> WideTable {
        let reduced = reduce_latest(observations);
        let mut table = WideTable::new(self.columns(&reduced, existing_courses));

        let mut by_student: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
        for o in &reduced {
            by_student.entry(o.student.as_str()).or_default().push(*o);
        }

        for (student, obs) in by_student {
            let mut scores: HashMap<String, Score> =
                table.courses.iter().map(|c| (c.clone(), Score::NotEnrolled)).collect();
            // obs is in observed_at order; two sections on one column keep the later real score
            for o in &obs {
                let col = self.registry.column_for(&o.course_name);
                let slot = scores.entry(col).or_insert(Score::NotEnrolled);
                if o.score.is_enrolled() || !slot.is_enrolled() {
                    *slot = o.score;
                }
            }

            let Some(newest) = obs.iter().max_by_key(|o| o.observed_at) else { continue };
            let mut identity = self.resolver.resolve(student);
            if identity.is_unknown() {
                if let Some(o) = obs.iter().rev().find(|o| !o.localized_name_a.is_empty() || !o.localized_name_b.is_empty()) {
                    identity.localized_name_a = o.localized_name_a.clone();
                    identity.localized_name_b = o.localized_name_b.clone();
                }
            }

            table.records.push(WideRecord {
                student: s!(student),
                localized_name_a: identity.localized_name_a,
                localized_name_b: identity.localized_name_b,
                is_latest: true,
                scores,
                observed_at: newest.observed_at,
                batch_id: batch.clone(),
            });
        }
        table
    }

    fn merge(&self, old: Option<WideTable>, fresh: WideTable, summary: &mut ReconcileSummary) -> WideTable {
        let mut table = old.unwrap_or_default();
        table.add_courses(&fresh.courses);

        for rec in table.records.iter_mut() {
            if fill_identity(rec, self.resolver) {
                summary.identities_backfilled += 1;
            }
        }

        for new in fresh.records {
            let same_batch = table.records.iter()
                .position(|r| r.student == new.student && r.batch_id == new.batch_id);

            if same_batch.is_none() {
                // a latest row never moves back to older readings
                let current = table.records.iter()
                    .find(|r| r.student == new.student && r.is_latest);
                if current.is_some_and(|cur| new.observed_at <= cur.observed_at) {
                    debug!(student = %new.student, observed_at = %new.observed_at, "not newer than latest row; skipped");
                    summary.rows_stale += 1;
                    continue;
                }
            }

            for r in table.records.iter_mut().filter(|r| r.student == new.student) {
                r.is_latest = false;
            }
            match same_batch {
                Some(i) => {
                    table.records[i] = new;
                    summary.rows_replaced += 1;
                }
                None => {
                    table.records.push(new);
                    summary.rows_added += 1;
                }
            }
        }

        summary.latest_repaired = enforce_single_latest(&mut table);
        table
    }

    /// Fill empty identity fields of every stored row. Writes `<wide>.bak` first.
    pub fn backfill_identities(&self, wide_path: &Path) -> Result<BackfillSummary> {
        self.backfill_inner(wide_path)
            .map_err(|e| e.into_file_error(wide_path, "backfill identities in"))
    }

    fn backfill_inner(&self, wide_path: &Path) -> Result<BackfillSummary> {
        let Some(mut table) = WideTable::load(wide_path)? else {
            return Err(Error::file(wide_path, "backfill identities in", "wide table not found"));
        };
        let count = |t: &WideTable| {
            let a = t.records.iter().filter(|r| r.localized_name_a.is_empty()).count();
            let b = t.records.iter().filter(|r| r.localized_name_b.is_empty()).count();
            (a, b)
        };
        let (missing_a_before, missing_b_before) = count(&table);

        let mut changed = 0;
        for rec in table.records.iter_mut() {
            if fill_identity(rec, self.resolver) { changed += 1; }
        }
        let (missing_a_after, missing_b_after) = count(&table);

        let mut backup = None;
        if changed > 0 {
            backup = Some(backup_copy(wide_path).map_err(|e| Error::file(wide_path, "back up", e))?);
            table.save(wide_path)?;
        }
        info!(
            path = %wide_path.display(),
            rows = table.records.len(),
            changed,
            "identity backfill complete"
        );
        Ok(BackfillSummary {
            rows: table.records.len(),
            missing_a_before,
            missing_b_before,
            missing_a_after,
            missing_b_after,
            backup,
        })
    }
}

/// Write only the latest rows of the wide table to `out`. Returns the row count.
pub fn export_latest(wide_path: &Path, out: &Path) -> Result<usize> {
    let Some(table) = WideTable::load(wide_path)? else {
        return Err(Error::file(wide_path, "export latest rows from", "wide table not found"));
    };
    let latest = table.latest_only();
    latest.save(out)?;
    info!(from = %wide_path.display(), to = %out.display(), rows = latest.records.len(), "latest rows exported");
    Ok(latest.records.len())
}
