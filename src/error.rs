// src/error.rs
//! Error taxonomy shared by every stage of the pipeline.
//!
//! The constructors log at `error!` as they build the value, so a caller that
//! only propagates with `?` still leaves a line in the run log.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Student credentials missing or unusable.
    #[error("credential error for {student}: {reason}")]
    Credential { student: String, reason: String },

    /// A collector could not reach (or read from) its source.
    #[error("failed to reach grade source for {student} at {endpoint}: {reason}")]
    ApiConnection { student: String, endpoint: String, reason: String },

    /// Malformed rows, unparsable timestamps, unreadable payloads.
    #[error("failed to process {data_type} data for {subject}: {reason}")]
    DataProcessing { subject: String, data_type: String, reason: String },

    /// Log / wide table / cache read-write failures.
    #[error("failed to {operation} file {}: {reason}", path.display())]
    FileOperation { path: PathBuf, operation: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn credential(student: &str, reason: impl Display) -> Self {
        error!(student, "credential error: {reason}");
        Error::Credential { student: s!(student), reason: reason.to_string() }
    }

    pub fn api(student: &str, endpoint: &str, reason: impl Display) -> Self {
        error!(student, endpoint, "source error: {reason}");
        Error::ApiConnection {
            student: s!(student),
            endpoint: s!(endpoint),
            reason: reason.to_string(),
        }
    }

    pub fn data(subject: &str, data_type: &str, reason: impl Display) -> Self {
        error!(subject, data_type, "data processing error: {reason}");
        Error::DataProcessing {
            subject: s!(subject),
            data_type: s!(data_type),
            reason: reason.to_string(),
        }
    }

    pub fn file(path: &Path, operation: &'static str, reason: impl Display) -> Self {
        error!(path = %path.display(), operation, "file operation error: {reason}");
        Error::FileOperation {
            path: path.to_path_buf(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Collapse any error into a `FileOperation` for `path`, keeping an existing
    /// `FileOperation` as-is.
    pub fn into_file_error(self, path: &Path, operation: &'static str) -> Self {
        match self {
            e @ Error::FileOperation { .. } => e,
            other => Error::file(path, operation, other),
        }
    }
}
