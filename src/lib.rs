// src/lib.rs

#[macro_use]
pub mod macros;

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod csv;
pub mod error;
pub mod file;
pub mod log;

pub mod batch;
pub mod collect;
pub mod credentials;
pub mod identity;
pub mod observation;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod runner;
pub mod store;

pub use error::{Error, Result};
