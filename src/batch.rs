// src/batch.rs
//! Run-scoped batch ids: `yyMMdd-HHmm`, sortable as text.
//!
//! One id per run, held by the `RunContext` created at start-up and passed down.
//! An id already present in the wide table gets a `-002`, `-003`, ... suffix.

use std::cell::OnceCell;
use std::collections::HashSet;
use std::fmt;

use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{info, warn};

use crate::config::consts::BATCH_ID_FORMAT;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(String);

impl BatchId {
    pub fn from_time(at: &NaiveDateTime) -> Self {
        BatchId(at.format(BATCH_ID_FORMAT).to_string())
    }

    /// Wrap an id read back from disk. No format check; old ids stay as they were written.
    pub fn from_stored(raw: &str) -> Self {
        BatchId(s!(raw.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn with_suffix(&self, n: u32) -> Self {
        BatchId(format!("{}-{n:03}", self.0))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct BatchTagger {
    started_at: NaiveDateTime,
    current: OnceCell<BatchId>,
}

impl BatchTagger {
    pub fn new(started_at: NaiveDateTime) -> Self {
        Self { started_at, current: OnceCell::new() }
    }

    /// Fresh id for the tagger's start time, suffixed past anything in `taken`.
    pub fn new_batch_id(&self, taken: &HashSet<&str>) -> BatchId {
        let base = BatchId::from_time(&self.started_at);
        if !taken.contains(base.as_str()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = base.with_suffix(n);
            if !taken.contains(candidate.as_str()) {
                warn!(base = %base, batch_id = %candidate, "batch id already used; suffixed");
                return candidate;
            }
            n += 1;
        }
    }

    /// The run's id, fixed on first call. Only the first caller's `taken` set counts.
    pub fn current_batch_id(&self, taken: &HashSet<&str>) -> &BatchId {
        self.current.get_or_init(|| {
            let id = self.new_batch_id(taken);
            info!(batch_id = %id, "batch id assigned");
            id
        })
    }

    /// Id if one has been assigned yet.
    pub fn assigned(&self) -> Option<&BatchId> {
        self.current.get()
    }
}

/// Per-run state, created once and passed explicitly.
pub struct RunContext {
    pub started_at: NaiveDateTime,
    pub batch: BatchTagger,
}

impl RunContext {
    pub fn new() -> Self {
        Self::at(Local::now().naive_local())
    }

    /// Fixed clock, for tests and replays.
    pub fn at(started_at: NaiveDateTime) -> Self {
        // batch ids are minute resolution; observation stamps keep seconds
        let started_at = started_at.with_nanosecond(0).unwrap_or(started_at);
        Self { started_at, batch: BatchTagger::new(started_at) }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
