//! This module is responsible for getting compressed blocks onto disk

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, Local, Utc};
use crossbeam_channel::Receiver;
use tracing::{debug, error, trace};

use crate::{
    codec::Compression,
    monitoring::{PipelineStats, RecordingReport},
    pipeline::ResultHandle,
    recorder::StopHandle,
    source::TunedSettings,
};

/// Write buffer in front of the data file
const WRITE_BUFFER: usize = 4 * 1024 * 1024;

/// Convert a chrono DateTime into the timestamp string used in metadata
pub fn capture_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Buffered data file, flushing also syncs to disk
pub struct DataFile {
    inner: BufWriter<File>,
}

impl DataFile {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::with_capacity(WRITE_BUFFER, file),
        })
    }
}

impl Write for DataFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_data()
    }
}

/// Drain the completion FIFO in order into `sink`.
///
/// Each handle is waited on in turn, so a slow block holds up the ones behind
/// it even if they are done. After a write error nothing more is written, but
/// handles are still consumed so the stages upstream can finish; the first
/// error is returned once the FIFO closes and `stop` is tripped right away.
pub fn write_ordered<W: Write>(
    handles: Receiver<ResultHandle>,
    sink: &mut W,
    stats: &PipelineStats,
    stop: &StopHandle,
) -> io::Result<()> {
    let mut failure: Option<io::Error> = None;
    let mut last_seq: Option<u64> = None;
    for handle in handles {
        let block = handle.wait();
        debug_assert!(last_seq.map_or(true, |last| last < block.seq));
        last_seq = Some(block.seq);
        if block.failed {
            stats.record_placeholder(block.samples);
            continue;
        }
        if failure.is_some() {
            stats.record_discarded(block.samples);
            continue;
        }
        match sink.write_all(&block.bytes) {
            Ok(()) => {
                trace!(seq = block.seq, bytes = block.bytes.len(), "Block written");
                stats.record_written(block.samples, block.bytes.len());
            }
            Err(e) => {
                error!(seq = block.seq, error = %e, "Write failed, stopping capture");
                stats.record_discarded(block.samples);
                stop.stop();
                failure = Some(e);
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }
    sink.flush()?;
    debug!(last_seq, "Writer finished");
    Ok(())
}

/// Everything that goes in the sidecar file
pub struct Metadata<'a> {
    pub tuned: &'a TunedSettings,
    pub compression: Compression,
    pub compression_level: i32,
    pub report: &'a RecordingReport,
    pub finished: DateTime<Utc>,
}

/// Write the `key=value` sidecar next to the data file
pub fn write_metadata(path: &Path, meta: &Metadata<'_>) -> io::Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    write_metadata_to(&mut f, meta)?;
    f.flush()?;
    f.get_ref().sync_all()
}

pub fn write_metadata_to<W: Write>(f: &mut W, meta: &Metadata<'_>) -> io::Result<()> {
    let stats = &meta.report.stats;
    writeln!(f, "# RF Recording Metadata")?;
    writeln!(
        f,
        "# Generated: {}",
        meta.finished.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.6f")
    )?;
    writeln!(f, "center_frequency_hz={}", meta.tuned.frequency)?;
    writeln!(f, "sample_rate_hz={}", meta.tuned.sample_rate)?;
    writeln!(f, "gain_db={}", meta.tuned.gain)?;
    writeln!(
        f,
        "duration_seconds={:.2}",
        meta.report.elapsed.as_secs_f64()
    )?;
    writeln!(f, "samples={}", stats.samples_written)?;
    writeln!(f, "data_type=complex64")?;
    writeln!(f, "compression={}", meta.compression)?;
    writeln!(f, "compression_level={}", meta.compression_level)?;
    writeln!(f, "compression_threads={}", meta.report.workers)?;
    writeln!(f, "overflow_count={}", stats.overflow_count)?;
    writeln!(f, "dropped_chunks={}", stats.chunks_dropped)?;
    writeln!(f, "original_size_bytes={}", stats.original_bytes())?;
    writeln!(f, "compressed_size_bytes={}", meta.report.file_size)?;
    let ratio = if meta.report.file_size > 0 {
        stats.original_bytes() as f64 / meta.report.file_size as f64
    } else {
        0.0
    };
    writeln!(f, "compression_ratio={ratio:.2}")?;
    writeln!(f, "timestamp={}", capture_timestamp(&meta.finished))
}
