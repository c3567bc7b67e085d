//! Recording lifecycle: start the pipeline, run acquisition, drain, close.
//!
//! A recording moves through `Running -> Stopping -> Draining -> Closed` and
//! never goes back. Stop requests only ever move `Running` to `Stopping`, so
//! repeating one, or sending one after the drain has started, does nothing.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Instant,
};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    capture::{acquire, AcquisitionSummary},
    codec::{BlockEncoder, Codec},
    config::RecorderConfig,
    error::RecorderError,
    exfil::{write_metadata, DataFile, Metadata},
    monitoring::{PipelineStats, RecordingReport},
    pipeline::{Pipeline, PipelineParams},
    queue::chunk_queue,
    source::{SampleSource, TuneRequest, TunedSettings},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RecorderState {
    Running = 0,
    Stopping = 1,
    Draining = 2,
    Closed = 3,
}

impl RecorderState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RecorderState::Running,
            1 => RecorderState::Stopping,
            2 => RecorderState::Draining,
            _ => RecorderState::Closed,
        }
    }
}

/// Shared view of a recording's state, used to request a stop from anywhere
/// (signal handlers, other threads, the writer on an I/O error)
#[derive(Debug, Clone)]
pub struct StopHandle {
    state: Arc<AtomicU8>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RecorderState::Running as u8)),
        }
    }

    /// Ask the recording to stop. Returns true only for the call that
    /// actually moved it out of `Running`.
    pub fn stop(&self) -> bool {
        self.state
            .compare_exchange(
                RecorderState::Running as u8,
                RecorderState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() != RecorderState::Running
    }

    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `to`, never backwards
    fn advance(&self, to: RecorderState) {
        let prev = self.state.fetch_max(to as u8, Ordering::AcqRel);
        if prev < to as u8 {
            info!(state = ?to, "Recorder state");
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a recording that got as far as opening its output
#[derive(Debug)]
pub struct RecordingOutcome {
    pub tuned: TunedSettings,
    pub acquisition: AcquisitionSummary,
    pub report: RecordingReport,
    pub data_path: PathBuf,
    /// `None` if the sidecar could not be written
    pub meta_path: Option<PathBuf>,
    /// The first error that ended or troubled the run, reported after the
    /// drain completed
    pub error: Option<RecorderError>,
}

impl RecordingOutcome {
    pub fn into_result(self) -> Result<RecordingOutcome, RecorderError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Drives one recording from configuration to closed file
pub struct Recorder {
    config: RecorderConfig,
    encoder: Arc<dyn BlockEncoder>,
    stop: StopHandle,
    stats: Arc<PipelineStats>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Result<Self, RecorderError> {
        config.validate()?;
        let encoder = Arc::new(Codec::new(config.compression, config.compression_level));
        Ok(Self {
            config,
            encoder,
            stop: StopHandle::new(),
            stats: Arc::new(PipelineStats::default()),
        })
    }

    /// Replace the block encoder. The output extension still follows the
    /// configured compression.
    pub fn with_encoder(mut self, encoder: Arc<dyn BlockEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> RecorderState {
        self.stop.state()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record from `source` until stopped, the capture length is reached or
    /// something fatal happens, then drain everything accepted to disk.
    ///
    /// Errors before the output file exists are returned directly. Once the
    /// pipeline is running, every error is held until the drain is done and
    /// handed back in [`RecordingOutcome::error`].
    pub fn run<S: SampleSource + ?Sized>(
        self,
        source: &mut S,
    ) -> Result<RecordingOutcome, RecorderError> {
        let data_path = self.config.data_path();
        self.record(source, |path| DataFile::create(path), &data_path, true)
    }

    /// Like [`Recorder::run`] but blocks go to `sink` instead of the data
    /// file. The sidecar is still written next to the configured output.
    pub fn run_with_sink<S: SampleSource + ?Sized, W: Write + Send + 'static>(
        self,
        source: &mut S,
        sink: W,
    ) -> Result<RecordingOutcome, RecorderError> {
        let data_path = self.config.data_path();
        self.record(source, move |_| Ok(sink), &data_path, false)
    }

    fn record<S, W, F>(
        self,
        source: &mut S,
        open: F,
        data_path: &Path,
        file_backed: bool,
    ) -> Result<RecordingOutcome, RecorderError>
    where
        S: SampleSource + ?Sized,
        W: Write + Send + 'static,
        F: FnOnce(&Path) -> std::io::Result<W>,
    {
        let config = &self.config;
        let request = TuneRequest {
            frequency: config.frequency,
            sample_rate: config.sample_rate,
            gain: config.gain,
        };
        let tuned = match source.configure(&request) {
            Ok(t) => t,
            Err(e) => {
                self.stop.advance(RecorderState::Closed);
                return Err(e.into());
            }
        };
        info!(
            frequency_mhz = tuned.frequency / 1e6,
            sample_rate_msps = tuned.sample_rate / 1e6,
            gain_db = tuned.gain,
            "Front-end tuned"
        );
        let params = match config.capture_params(tuned.sample_rate) {
            Ok(p) => p,
            Err(e) => {
                self.stop.advance(RecorderState::Closed);
                return Err(e.into());
            }
        };

        let file = match open(data_path) {
            Ok(f) => f,
            Err(e) => {
                self.stop.advance(RecorderState::Closed);
                return Err(e.into());
            }
        };
        let workers = config.worker_count();
        info!(
            path = %data_path.display(),
            compression = %config.compression,
            level = config.compression_level,
            workers,
            "Starting recording"
        );

        let (mut submitter, chunks) = chunk_queue(config.queue_capacity, self.stats.clone());
        let pipeline = match Pipeline::start(
            chunks,
            self.encoder.clone(),
            file,
            self.stats.clone(),
            self.stop.clone(),
            PipelineParams {
                workers,
                completion_capacity: config.completion_capacity,
            },
        ) {
            Ok(p) => p,
            Err(e) => {
                self.stop.advance(RecorderState::Closed);
                return Err(e);
            }
        };

        let started = Instant::now();
        let mut first_error: Option<RecorderError> = None;
        let acquisition = match source.start_streaming() {
            Ok(()) => {
                let result = acquire(source, &mut submitter, &self.stop, &self.stats, &params);
                if let Err(e) = source.stop_streaming() {
                    warn!(error = %e, "Failed to stop front-end stream");
                    keep_first(&mut first_error, e.into());
                }
                match result {
                    Ok(summary) => summary,
                    Err((summary, e)) => {
                        // The fatal error outranks anything from stop_streaming
                        first_error = Some(e);
                        summary
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Front-end failed to start streaming");
                first_error = Some(e.into());
                AcquisitionSummary::default()
            }
        };
        self.stop.stop();
        self.stop.advance(RecorderState::Draining);
        info!(
            in_flight = self.stats.chunks_in_flight(),
            "Finalizing compression and file I/O"
        );

        // Closing the queue lets the dispatcher, then the workers, then the
        // writer run dry
        drop(submitter);
        if let Err(e) = pipeline.finish() {
            error!(error = %e, "Pipeline finished with an error");
            keep_first(&mut first_error, e);
        }
        self.stop.advance(RecorderState::Closed);

        let elapsed = started.elapsed();
        let stats = self.stats.snapshot();
        let file_size = if file_backed {
            fs::metadata(data_path)
                .map(|m| m.len())
                .unwrap_or(stats.bytes_written)
        } else {
            stats.bytes_written
        };
        let report = RecordingReport {
            stats,
            elapsed,
            workers,
            file_size,
        };

        let meta_path = config.meta_path();
        let meta = Metadata {
            tuned: &tuned,
            compression: config.compression,
            compression_level: config.compression_level,
            report: &report,
            finished: Utc::now(),
        };
        let meta_path = match write_metadata(&meta_path, &meta) {
            Ok(()) => Some(meta_path),
            Err(e) => {
                error!(error = %e, path = %meta_path.display(), "Failed to write metadata");
                keep_first(&mut first_error, e.into());
                None
            }
        };
        info!(
            samples = report.stats.samples_written,
            bytes = report.file_size,
            overflows = report.stats.overflow_count,
            dropped = report.stats.chunks_dropped,
            "Recording closed"
        );

        Ok(RecordingOutcome {
            tuned,
            acquisition,
            report,
            data_path: data_path.to_owned(),
            meta_path,
            error: first_error,
        })
    }
}

fn keep_first(slot: &mut Option<RecorderError>, e: RecorderError) {
    if slot.is_none() {
        *slot = Some(e);
    }
}
