//! Runtime counters for the capture pipeline.
//!
//! Acquisition and the writer bump these from their own threads, everything is
//! a relaxed atomic since no counter is used to synchronize data. A consistent
//! view only exists once the recorder reaches `Closed`.

use std::{
    fmt,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Duration,
};

use crate::complex::SAMPLE_BYTES;

#[derive(Debug, Default)]
pub struct PipelineStats {
    samples_accepted: AtomicU64,
    chunks_accepted: AtomicU64,
    chunks_dropped: AtomicU64,
    samples_dropped: AtomicU64,
    overflow_count: AtomicU64,
    samples_written: AtomicU64,
    chunks_written: AtomicU64,
    bytes_written: AtomicU64,
    compression_failures: AtomicU64,
    samples_failed: AtomicU64,
    samples_discarded: AtomicU64,
    chunks_in_flight: AtomicI64,
}

impl PipelineStats {
    pub fn record_accepted(&self, samples: usize) {
        self.chunks_accepted.fetch_add(1, Ordering::Relaxed);
        self.samples_accepted
            .fetch_add(samples as u64, Ordering::Relaxed);
        self.chunks_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, samples: usize) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        self.samples_dropped
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A block left the pipeline, `bytes` of it reached the file
    pub fn record_written(&self, samples: usize, bytes: usize) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.samples_written
            .fetch_add(samples as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.chunks_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// A failed block left the pipeline, nothing of it reached the file
    pub fn record_placeholder(&self, samples: usize) {
        self.compression_failures.fetch_add(1, Ordering::Relaxed);
        self.samples_failed
            .fetch_add(samples as u64, Ordering::Relaxed);
        self.chunks_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// A block drained after the output failed, so never written
    pub fn record_discarded(&self, samples: usize) {
        self.samples_discarded
            .fetch_add(samples as u64, Ordering::Relaxed);
        self.chunks_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped.load(Ordering::Relaxed)
    }

    pub fn chunks_in_flight(&self) -> i64 {
        self.chunks_in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            compression_failures: self.compression_failures.load(Ordering::Relaxed),
            samples_failed: self.samples_failed.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded.load(Ordering::Relaxed),
            chunks_in_flight: self.chunks_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub samples_accepted: u64,
    pub chunks_accepted: u64,
    pub chunks_dropped: u64,
    pub samples_dropped: u64,
    pub overflow_count: u64,
    /// Samples that reached the file
    pub samples_written: u64,
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub compression_failures: u64,
    /// Samples lost to failed encodes
    pub samples_failed: u64,
    /// Samples drained without writing after an output error
    pub samples_discarded: u64,
    pub chunks_in_flight: i64,
}

impl StatsSnapshot {
    /// Raw size of everything that was written, as complex64
    pub fn original_bytes(&self) -> u64 {
        self.samples_written * SAMPLE_BYTES as u64
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_written == 0 {
            0.0
        } else {
            self.original_bytes() as f64 / self.bytes_written as f64
        }
    }
}

/// Final numbers for a recording, built once the pipeline is closed
#[derive(Debug, Clone)]
pub struct RecordingReport {
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
    pub workers: usize,
    /// Size of the data file on disk
    pub file_size: u64,
}

impl RecordingReport {
    /// Average output rate in MiB/s
    pub fn data_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.file_size as f64 / MIB / secs
        } else {
            0.0
        }
    }
}

const MIB: f64 = 1024.0 * 1024.0;

impl fmt::Display for RecordingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(f, "Samples recorded: {}", s.samples_written)?;
        writeln!(f, "Duration: {:.2} seconds", self.elapsed.as_secs_f64())?;
        writeln!(f, "Compression threads used: {}", self.workers)?;
        writeln!(f, "Overflow count: {}", s.overflow_count)?;
        writeln!(
            f,
            "Dropped chunks: {} ({} samples)",
            s.chunks_dropped, s.samples_dropped
        )?;
        if s.compression_failures > 0 {
            writeln!(
                f,
                "Failed blocks: {} ({} samples)",
                s.compression_failures, s.samples_failed
            )?;
        }
        writeln!(f, "Original size: {:.1} MB", s.original_bytes() as f64 / MIB)?;
        writeln!(f, "Compressed size: {:.1} MB", self.file_size as f64 / MIB)?;
        writeln!(f, "Compression ratio: {:.2}:1", s.compression_ratio())?;
        write!(f, "Average data rate: {:.1} MB/s", self.data_rate())
    }
}
