//! Error types for the dispatch core

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a catch-up source query
///
/// The gate never surfaces these to callers; a failed query counts as
/// "not caught up".
#[derive(Debug, Error)]
pub enum CatchUpError {
    /// The source could not determine its state
    #[error("catch-up source '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// The source query panicked
    #[error("catch-up source '{source_name}' panicked: {message}")]
    Panicked { source_name: String, message: String },
}

/// Failure to hand a job to a background execution context
#[derive(Debug, Error)]
pub enum ExecError {
    /// OS thread creation failed
    #[error("failed to spawn background thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Worker pool is no longer accepting jobs
    #[error("worker pool is shut down")]
    PoolClosed,

    /// The runtime could not start a blocking-pool thread
    #[error("blocking pool rejected job: {0}")]
    BlockingPool(String),

    /// No async runtime is available to borrow a blocking pool from
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

/// Extract a printable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
