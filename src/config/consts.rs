// src/config/consts.rs

// Config discovery
pub const DEFAULT_CONFIG_FILE: &str = "grades.toml";
pub const CONFIG_ENV: &str = "GRADE_SYNC_CONFIG";

// Default file layout
pub const DEFAULT_DATA_DIR: &str = "data";
pub const OBSERVATION_LOG_FILE: &str = "grades.csv";
pub const WIDE_TABLE_FILE: &str = "grades_wide.csv";
pub const SNAPSHOT_FILE: &str = "grades_cache.json";
pub const REPORT_FILE: &str = "report.json";
pub const LOG_FILE: &str = "grade_sync.log";
pub const FEED_SUBDIR: &str = "feed";
pub const IDENTITIES_FILE: &str = "config/identities.toml";
pub const OVERRIDES_FILE: &str = "config/identity_overrides.toml";
pub const CREDENTIALS_FILE: &str = "credentials.json";

// Cell values
pub const NOT_ENROLLED: &str = "N/A";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const BATCH_ID_FORMAT: &str = "%y%m%d-%H%M";
pub const UNKNOWN_COURSE: &str = "Unknown course";

// Report thresholds
pub const A_THRESHOLD: f64 = 90.0;
pub const AT_RISK_CEILING: f64 = 92.5;
pub const TOP_PERFORMER_FLOOR: f64 = 95.0;
pub const VERY_LOW_SCORE: f64 = 60.0;
pub const PRIORITY_COURSE_COUNT: usize = 3;
