// src/config/options.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::consts::*;
use super::registry::CourseRegistry;
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub registry: CourseRegistry,
    pub report: ReportSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub observation_log: PathBuf,
    pub wide_table: PathBuf,
    pub snapshot: PathBuf,
    pub report: PathBuf,
    pub log_file: PathBuf,
    pub feed_dir: PathBuf,
    pub identities: PathBuf,
    pub overrides: PathBuf,
    pub credentials: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = Path::new(DEFAULT_DATA_DIR);
        Self {
            observation_log: data.join(OBSERVATION_LOG_FILE),
            wide_table: data.join(WIDE_TABLE_FILE),
            snapshot: data.join(SNAPSHOT_FILE),
            report: data.join(REPORT_FILE),
            log_file: data.join(LOG_FILE),
            feed_dir: data.join(FEED_SUBDIR),
            identities: PathBuf::from(IDENTITIES_FILE),
            overrides: PathBuf::from(OVERRIDES_FILE),
            credentials: PathBuf::from(CREDENTIALS_FILE),
        }
    }
}

impl PathsConfig {
    /// Re-anchor relative paths on `base` (the config file's directory).
    pub fn rebase(&mut self, base: &Path) {
        for p in [
            &mut self.observation_log, &mut self.wide_table, &mut self.snapshot,
            &mut self.report, &mut self.log_file, &mut self.feed_dir,
            &mut self.identities, &mut self.overrides, &mut self.credentials,
        ] {
            if p.is_relative() { *p = base.join(&*p); }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub a_threshold: f64,
    /// Scores in `[a_threshold, at_risk_ceiling)` land on the at-risk list.
    pub at_risk_ceiling: f64,
    pub top_performer_floor: f64,
    pub very_low_score: f64,
    pub priority_course_count: usize,
    /// Course columns left out of every statistic.
    pub excluded_courses: Vec<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            a_threshold: A_THRESHOLD,
            at_risk_ceiling: AT_RISK_CEILING,
            top_performer_floor: TOP_PERFORMER_FLOOR,
            very_low_score: VERY_LOW_SCORE,
            priority_course_count: PRIORITY_COURSE_COUNT,
            excluded_courses: Vec::new(),
        }
    }
}

impl ReportSettings {
    pub fn is_excluded(&self, column: &str) -> bool {
        self.excluded_courses.iter().any(|c| c == column)
    }
}

/// Config file to read: explicit flag, then `GRADE_SYNC_CONFIG`, then `grades.toml`.
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(p) = cli {
        return p.to_path_buf();
    }
    match env::var_os(CONFIG_ENV) {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`. A missing default file yields built-in defaults;
    /// a missing file that was asked for explicitly is an error.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() {
            if explicit {
                return Err(Error::Config(format!("config file not found: {}", path.display())));
            }
            info!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| Error::file(path, "read", e))?;
        let mut cfg = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            cfg.paths.rebase(base);
        }
        debug!(path = %path.display(), courses = cfg.registry.courses.len(), "config loaded");
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml_str(r#"
            [paths]
            wide_table = "out/wide.csv"

            [registry]
            term_marker = "(2025S-"

            [[registry.course]]
            raw = "Calculus 3A - S9723 (2025S-MATH-3A)"
            localized = "微积分 3A"

            [report]
            excluded_courses = ["Orientation"]
        "#).unwrap();

        assert_eq!(cfg.paths.wide_table, PathBuf::from("out/wide.csv"));
        assert_eq!(cfg.paths.observation_log, PathsConfig::default().observation_log);
        assert_eq!(cfg.registry.columns(), vec!["Calculus 3A"]);
        assert_eq!(cfg.report.a_threshold, 90.0);
        assert!(cfg.report.is_excluded("Orientation"));
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(AppConfig::from_toml_str("[paths\n"), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_cli_path_wins() {
        let p = resolve_config_path(Some(Path::new("x.toml")));
        assert_eq!(p, PathBuf::from("x.toml"));
    }

    #[test]
    fn relative_paths_follow_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grades.toml");
        fs::write(&path, "[paths]\nwide_table = \"w.csv\"\n").unwrap();
        let cfg = AppConfig::load(&path, true).unwrap();
        assert_eq!(cfg.paths.wide_table, dir.path().join("w.csv"));
    }
}
