//! Recording configuration
//!
//! Values come from an optional TOML file and are then overridden by whatever
//! was given on the command line (see [`crate::args::Args::apply`]).

use std::{
    fs,
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use serde::Deserialize;

use crate::{capture::CaptureParams, codec::Compression, error::ConfigError};

/// Receive batch size requested from the front-end per call
pub const DEFAULT_BATCH_SIZE: usize = 8192;
/// Samples per chunk (1M complex64 samples = 8 MiB raw)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Longest receive timeout accepted
pub const MAX_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderConfig {
    /// Center frequency in Hz
    pub frequency: f64,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// RF gain in dB
    pub gain: f64,
    /// Capture length in seconds, unbounded (until stopped) if unset
    pub duration: Option<f64>,
    /// Output path, without the compression extension
    pub output: PathBuf,
    /// Samples per chunk
    pub chunk_size: usize,
    /// Samples requested per receive call
    pub batch_size: usize,
    /// Capacity of the acquisition -> compression queue, in chunks
    pub queue_capacity: usize,
    /// Capacity of the ordered completion queue, in blocks
    pub completion_capacity: usize,
    /// Compression threads, `available_parallelism - 1` if unset
    pub workers: Option<usize>,
    pub compression: Compression,
    pub compression_level: i32,
    /// Per-call receive timeout in seconds
    pub receive_timeout: f64,
    /// Consecutive overflows before a warning is logged
    pub overflow_warn_run: u32,
    /// Consecutive overflows that abort the recording, never if unset
    pub overflow_abort_run: Option<u32>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frequency: 2.44e9,
            sample_rate: 10e6,
            gain: 30.0,
            duration: None,
            output: PathBuf::from("capture.iq"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: 10,
            completion_capacity: 20,
            workers: None,
            compression: Compression::None,
            compression_level: 3,
            receive_timeout: 0.1,
            overflow_warn_run: 100,
            overflow_abort_run: None,
        }
    }
}

impl RecorderConfig {
    /// Load from a TOML file, missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("chunk_size", self.chunk_size),
            ("batch_size", self.batch_size),
            ("queue_capacity", self.queue_capacity),
            ("completion_capacity", self.completion_capacity),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(
                "sample_rate must be positive and finite".into(),
            ));
        }
        let timeout = self.receive_timeout()?;
        if timeout.is_zero() || timeout > MAX_RECEIVE_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "receive_timeout must be above 0 and at most {} s",
                MAX_RECEIVE_TIMEOUT.as_secs()
            )));
        }
        if let Some(d) = self.duration {
            if seconds("duration", d)?.is_zero() {
                return Err(ConfigError::Invalid("duration must be positive".into()));
            }
        }
        if self.overflow_warn_run == 0 || self.overflow_abort_run == Some(0) {
            return Err(ConfigError::Invalid(
                "overflow thresholds must be at least 1".into(),
            ));
        }
        self.compression.validate_level(self.compression_level)
    }

    /// Number of compression threads to spawn
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    pub fn receive_timeout(&self) -> Result<Duration, ConfigError> {
        seconds("receive_timeout", self.receive_timeout)
    }

    /// Total samples to capture at the given (actual) rate, if bounded
    pub fn max_samples(&self, actual_rate: f64) -> Option<u64> {
        self.duration.map(|d| (d * actual_rate) as u64)
    }

    /// Parameters for the acquisition loop, given the rate the front-end
    /// actually tuned to
    pub fn capture_params(&self, actual_rate: f64) -> Result<CaptureParams, ConfigError> {
        let chunk_size = NonZeroUsize::new(self.chunk_size)
            .ok_or_else(|| ConfigError::Invalid("chunk_size must be at least 1".into()))?;
        let overflow_warn_run = NonZeroU32::new(self.overflow_warn_run).ok_or_else(|| {
            ConfigError::Invalid("overflow_warn_run must be at least 1".into())
        })?;
        Ok(CaptureParams {
            chunk_size,
            batch_size: self.batch_size,
            receive_timeout: self.receive_timeout()?,
            max_samples: self.max_samples(actual_rate),
            overflow_warn_run,
            overflow_abort_run: self.overflow_abort_run,
        })
    }

    /// Path of the data file, with the compression extension appended
    pub fn data_path(&self) -> PathBuf {
        append_extension(&self.output, self.compression.extension())
    }

    /// Path of the sidecar metadata file
    pub fn meta_path(&self) -> PathBuf {
        append_extension(&self.output, ".meta")
    }
}

/// One core is left for acquisition and file I/O
fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Seconds from a config value, rejecting negative, NaN and unrepresentable
/// values
fn seconds(name: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::Invalid(format!("{name} = {value}: {e}")))
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(ext);
    PathBuf::from(s)
}
