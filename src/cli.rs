// src/cli.rs
use std::{env, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    batch::RunContext,
    collect::FeedSource,
    config::{AppConfig, consts::CONFIG_ENV, resolve_config_path},
    credentials::CredentialStore,
    error::{Error, Result},
    identity::IdentityResolver,
    log,
    progress::Progress,
    reconcile::{Reconciler, export_latest},
    runner,
};

#[derive(Parser)]
#[command(name = "grade_sync", version)]
#[command(about = "Grade observation log to wide table, with cohort reports", long_about = None)]
struct Cli {
    /// Config file (default: $GRADE_SYNC_CONFIG, then ./grades.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Fetch every student, append, reconcile, report
    Run {
        /// Feed directory (default: [paths].feed_dir)
        #[arg(long)]
        feed: Option<PathBuf>,
    },
    /// Merge the observation log into the wide table
    Reconcile,
    /// Aggregate the latest rows against the cached snapshot
    Report {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
        /// Leave the snapshot cache untouched
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill empty identity fields in the wide table (writes a .bak first)
    Backfill,
    /// Show how a display name resolves
    Resolve { name: String },
    /// Write only the latest rows to another CSV
    ExportLatest {
        #[arg(long)]
        out: PathBuf,
    },
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Reconcile => "reconcile",
            Command::Report { .. } => "report",
            Command::Backfill => "backfill",
            Command::Resolve { .. } => "resolve",
            Command::ExportLatest { .. } => "export-latest",
        }
    }
}

/// One line per student on stderr.
struct ConsoleProgress {
    total: usize,
    seen: usize,
}

impl Progress for ConsoleProgress {
    fn begin(&mut self, total: usize) {
        self.total = total;
    }
    fn log(&mut self, msg: &str) {
        eprintln!("{msg}");
    }
    fn item_done(&mut self, student: &str, records: usize) {
        self.seen += 1;
        eprintln!("[{}/{}] {student}: {records} records", self.seen, self.total);
    }
    fn item_failed(&mut self, student: &str, reason: &str) {
        self.seen += 1;
        eprintln!("[{}/{}] {student}: skipped ({reason})", self.seen, self.total);
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let explicit = cli.config.is_some() || env::var_os(CONFIG_ENV).is_some_and(|v| !v.is_empty());
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = AppConfig::load(&config_path, explicit)?;
    log::init(&config.paths.log_file, cli.verbose)?;

    let label = cli.command.label();
    match dispatch(cli.command, &config) {
        Ok(()) => Ok(()),
        Err(e) => {
            println!("FAIL {label}: {e}");
            Err(e)
        }
    }
}

fn dispatch(command: Command, config: &AppConfig) -> Result<()> {
    let paths = &config.paths;
    match command {
        Command::Run { feed } => {
            let ctx = RunContext::new();
            let resolver = IdentityResolver::load(&paths.identities, &paths.overrides)?;
            let students = CredentialStore::load(&paths.credentials)?;
            let source = FeedSource::new(feed.unwrap_or_else(|| paths.feed_dir.clone()));
            let mut progress = ConsoleProgress { total: 0, seen: 0 };

            let s = runner::run(config, &ctx, &resolver, &students, &source, Some(&mut progress as &mut dyn Progress))?;
            let batch = s.batch_id.as_ref().map(|b| b.to_string()).unwrap_or_else(|| s!("-"));
            println!(
                "PASS run: batch {batch}, {}/{} students ({:.0}%), {} failed, {} records, {} rows added",
                s.students_processed, s.students_total, s.success_rate(),
                s.students_failed, s.records_added, s.reconcile.rows_added,
            );
        }
        Command::Reconcile => {
            let ctx = RunContext::new();
            let resolver = IdentityResolver::load(&paths.identities, &paths.overrides)?;
            let s = Reconciler::new(&config.registry, &resolver, &ctx)
                .reconcile(&paths.observation_log, &paths.wide_table)?;
            let batch = s.batch_id.as_ref().map(|b| b.to_string()).unwrap_or_else(|| s!("-"));
            println!(
                "PASS reconcile: batch {batch}, {} added, {} replaced, {} unchanged, {} rows, {} courses",
                s.rows_added, s.rows_replaced, s.rows_stale, s.rows_total, s.courses,
            );
        }
        Command::Report { json, dry_run } => {
            let stats = runner::report(config, !dry_run)?;
            if json {
                let text = serde_json::to_string_pretty(&stats)
                    .map_err(|e| Error::data("report", "json", e))?;
                println!("{text}");
            } else {
                println!(
                    "PASS report: {} students, {} courses, average {:.1}, A {:.1}%, {} underperforming, {} at risk",
                    stats.students, stats.courses.len(), stats.overall.average_score,
                    stats.overall.a_grade_percent, stats.underperforming.len(), stats.at_risk.len(),
                );
            }
        }
        Command::Backfill => {
            let ctx = RunContext::new();
            let resolver = IdentityResolver::load(&paths.identities, &paths.overrides)?;
            let s = Reconciler::new(&config.registry, &resolver, &ctx).backfill_identities(&paths.wide_table)?;
            println!(
                "PASS backfill: {} rows, fixed {} fields (missing a {}→{}, b {}→{})",
                s.rows, s.fixed(), s.missing_a_before, s.missing_a_after, s.missing_b_before, s.missing_b_after,
            );
        }
        Command::Resolve { name } => {
            let resolver = IdentityResolver::load(&paths.identities, &paths.overrides)?;
            let (id, kind) = resolver.resolve_traced(&name);
            println!("{name}\t{}\t{}\t{}", id.localized_name_a, id.localized_name_b, kind.as_str());
        }
        Command::ExportLatest { out } => {
            let rows = export_latest(&paths.wide_table, &out)?;
            println!("PASS export-latest: {rows} rows → {}", out.display());
        }
    }
    Ok(())
}
