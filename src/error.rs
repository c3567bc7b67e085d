//! Error types for the capture pipeline
//!
//! Only the conditions that end a recording live in [`RecorderError`]. Timeouts,
//! overflows, queue drops and single-block compression failures are counted in
//! [`crate::monitoring::PipelineStats`] instead and never abort a run on their own.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`crate::source::SampleSource`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("front-end rejected configuration: {0}")]
    Configure(String),
    #[error("front-end failed to {action} streaming: {message}")]
    Streaming {
        action: &'static str,
        message: String,
    },
    #[error("front-end fatal error: {0}")]
    Fatal(String),
}

/// Errors from a single block encode
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("encoder I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end a recording
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("sustained overflow: {run} consecutive overflowed receives")]
    SustainedOverflow { run: u32 },
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline thread '{0}' panicked")]
    ThreadPanic(&'static str),
}
