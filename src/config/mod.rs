// src/config/mod.rs
pub mod consts;
pub mod options;
pub mod registry;

pub use options::{AppConfig, PathsConfig, ReportSettings, resolve_config_path};
pub use registry::{CourseEntry, CourseRegistry};
