//! This module contains all the capture logic

// The acquisition loop does one thing, as fast as possible: pull batches from
// the front-end and pack them into chunks. Everything else (compression, disk)
// happens on other threads on the far side of the chunk queue, and this loop
// never waits on them.

use std::{
    num::{NonZeroU32, NonZeroUsize},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    chunk::Accumulator,
    complex::{mean_power, Sample, SAMPLE_BYTES},
    error::{RecorderError, SourceError},
    monitoring::PipelineStats,
    queue::ChunkSubmitter,
    recorder::StopHandle,
    source::{RxStatus, SampleSource},
};

/// Chunks between progress lines when the capture length is unknown
const PROGRESS_CHUNKS: u64 = 64;
/// Progress steps for a bounded capture
const PROGRESS_STEPS: u64 = 20;

#[derive(Debug, Clone)]
pub struct CaptureParams {
    pub chunk_size: NonZeroUsize,
    pub batch_size: usize,
    pub receive_timeout: Duration,
    /// Stop once this many samples were taken
    pub max_samples: Option<u64>,
    pub overflow_warn_run: NonZeroU32,
    pub overflow_abort_run: Option<u32>,
}

/// What the loop saw, independent of what the pipeline did with it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionSummary {
    /// Samples taken from `ok` batches
    pub samples: u64,
    /// Chunks handed to the queue, accepted or not
    pub chunks: u64,
    pub overflows: u64,
    pub timeouts: u64,
    /// The capture length was reached
    pub completed: bool,
}

struct Progress {
    start: Instant,
    total: Option<u64>,
    next_step: u64,
}

impl Progress {
    fn new(total: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            total,
            next_step: 1,
        }
    }

    /// Log a progress line if one is due, returns whether it did
    fn update(
        &mut self,
        summary: &AcquisitionSummary,
        last: &[Sample],
        buffered: usize,
    ) -> bool {
        let due = match self.total {
            Some(total) if total > 0 => {
                summary.samples * PROGRESS_STEPS >= self.next_step * total
            }
            _ => summary.chunks >= self.next_step * PROGRESS_CHUNKS,
        };
        if !due {
            return false;
        }
        // A single batch may cross several steps, log once and skip past them
        self.next_step = match self.total {
            Some(total) if total > 0 => summary.samples * PROGRESS_STEPS / total + 1,
            _ => summary.chunks / PROGRESS_CHUNKS + 1,
        };
        let elapsed = self.start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            (summary.samples * SAMPLE_BYTES as u64) as f64 / MIB / elapsed
        } else {
            0.0
        };
        let percent = match self.total {
            Some(t) => format!("{:.1}%", 100.0 * summary.samples as f64 / t.max(1) as f64),
            None => "-".to_owned(),
        };
        let power_db = 10.0 * mean_power(last).max(f32::MIN_POSITIVE).log10();
        info!(
            progress = %percent,
            samples = summary.samples,
            ram_mb = %format!("{:.1}", (buffered * SAMPLE_BYTES) as f64 / MIB),
            rate_mbps = %format!("{rate:.1}"),
            power_db = %format!("{power_db:.1}"),
            overflows = summary.overflows,
            "Capture progress"
        );
        true
    }
}

const MIB: f64 = 1024.0 * 1024.0;

/// Drive `source` until a stop request, a fatal status or the capture length,
/// packing samples into chunks for `queue`.
///
/// Whatever is left in the accumulation buffer when the loop ends, for any
/// reason, goes out as a final short chunk before returning. The summary is
/// returned on failure too, next to the error that ended the loop.
pub fn acquire<S: SampleSource + ?Sized>(
    source: &mut S,
    queue: &mut ChunkSubmitter,
    stop: &StopHandle,
    stats: &PipelineStats,
    params: &CaptureParams,
) -> Result<AcquisitionSummary, (AcquisitionSummary, RecorderError)> {
    let mut acc = Accumulator::new(params.chunk_size);
    let mut buf = vec![Sample::default(); params.batch_size];
    let mut summary = AcquisitionSummary::default();
    let mut progress = Progress::new(params.max_samples);
    let mut overflow_run = 0u32;

    let result = loop {
        if stop.is_stopped() {
            debug!("Stop requested, leaving acquisition loop");
            break Ok(());
        }
        let rx = source.receive(&mut buf, params.receive_timeout);
        match rx.status {
            RxStatus::Timeout => {
                summary.timeouts += 1;
            }
            RxStatus::Overflow => {
                stats.record_overflow();
                summary.overflows += 1;
                overflow_run += 1;
                if overflow_run % params.overflow_warn_run.get() == 0 {
                    warn!(
                        run = overflow_run,
                        total = stats.overflow_count(),
                        "Front-end is overflowing continuously"
                    );
                }
                if let Some(limit) = params.overflow_abort_run {
                    if overflow_run >= limit {
                        error!(run = overflow_run, "Aborting on sustained overflow");
                        break Err(RecorderError::SustainedOverflow { run: overflow_run });
                    }
                }
            }
            RxStatus::Fatal(msg) => {
                error!(%msg, "Front-end reported a fatal error");
                break Err(SourceError::Fatal(msg).into());
            }
            RxStatus::Ok => {
                overflow_run = 0;
                let mut take = rx.samples.min(buf.len());
                if let Some(max) = params.max_samples {
                    take = take.min(max.saturating_sub(summary.samples) as usize);
                }
                let batch = &buf[..take];
                acc.push(batch, |chunk| {
                    summary.chunks += 1;
                    // A full queue is counted and logged by the submitter
                    let _ = queue.submit(chunk);
                });
                summary.samples += take as u64;
                progress.update(&summary, batch, acc.buffered());
                if params.max_samples.is_some_and(|max| summary.samples >= max) {
                    info!(samples = summary.samples, "Capture length reached");
                    summary.completed = true;
                    break Ok(());
                }
            }
        }
    };

    if let Some(chunk) = acc.flush() {
        debug!(seq = chunk.seq(), samples = chunk.len(), "Flushing partial chunk");
        summary.chunks += 1;
        let _ = queue.submit_timeout(chunk, params.receive_timeout);
    }
    match result {
        Ok(()) => Ok(summary),
        Err(e) => Err((summary, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::SampleChunk,
        monitoring::StatsSnapshot,
        queue::{chunk_queue, ChunkReceiver},
        testing::{ramp, ScriptedSource, Step},
    };
    use std::sync::Arc;

    fn params(chunk_size: usize) -> CaptureParams {
        CaptureParams {
            chunk_size: NonZeroUsize::new(chunk_size).unwrap(),
            batch_size: 16,
            receive_timeout: Duration::from_millis(20),
            max_samples: None,
            overflow_warn_run: NonZeroU32::new(100).unwrap(),
            overflow_abort_run: None,
        }
    }

    fn drain(rx: ChunkReceiver) -> Vec<SampleChunk> {
        rx.collect()
    }

    #[test]
    fn test_overflows_are_counted_and_skipped() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, rx) = chunk_queue(8, stats.clone());
        let mut src = ScriptedSource::new([
            Step::Overflow,
            Step::Overflow,
            Step::Overflow,
            Step::Samples(ramp(0, 4)),
            Step::Samples(ramp(4, 4)),
        ])
        .stop_when_exhausted(stop.clone());
        let summary = acquire(&mut src, &mut tx, &stop, &stats, &params(4)).unwrap();
        drop(tx);
        assert_eq!(3, stats.overflow_count());
        assert_eq!(3, summary.overflows);
        let chunks = drain(rx);
        assert_eq!(2, chunks.len());
        assert_eq!(ramp(0, 4), chunks[0].samples());
        assert_eq!(ramp(4, 4), chunks[1].samples());
    }

    #[test]
    fn test_timeouts_change_nothing() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, rx) = chunk_queue(8, stats.clone());
        let mut src = ScriptedSource::new([Step::Timeout, Step::Timeout, Step::Timeout])
            .stop_when_exhausted(stop.clone());
        let summary = acquire(&mut src, &mut tx, &stop, &stats, &params(4)).unwrap();
        drop(tx);
        assert_eq!(3, summary.timeouts);
        assert_eq!(StatsSnapshot::default(), stats.snapshot());
        assert!(drain(rx).is_empty());
    }

    #[test]
    fn test_stop_flushes_partial_chunk() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, rx) = chunk_queue(8, stats.clone());
        let mut src = ScriptedSource::new([
            Step::Samples(ramp(0, 4)),
            Step::Samples(ramp(4, 2)),
        ])
        .stop_when_exhausted(stop.clone());
        acquire(&mut src, &mut tx, &stop, &stats, &params(4)).unwrap();
        drop(tx);
        let chunks = drain(rx);
        assert_eq!(2, chunks.len());
        assert_eq!(1, chunks[1].seq());
        assert_eq!(ramp(4, 2), chunks[1].samples());
        assert_eq!(6, stats.snapshot().samples_accepted);
    }

    #[test]
    fn test_fatal_error_still_flushes() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, rx) = chunk_queue(8, stats.clone());
        let mut src = ScriptedSource::new([
            Step::Samples(ramp(0, 3)),
            Step::Fatal("usb disconnected".into()),
            Step::Samples(ramp(3, 4)),
        ]);
        let (summary, err) = acquire(&mut src, &mut tx, &stop, &stats, &params(4)).unwrap_err();
        drop(tx);
        assert!(matches!(
            err,
            RecorderError::Source(SourceError::Fatal(ref m)) if m == "usb disconnected"
        ));
        assert_eq!(3, summary.samples);
        assert_eq!(1, summary.chunks);
        // The batch after the fatal status is never read
        assert_eq!(1, src.remaining());
        let chunks = drain(rx);
        assert_eq!(1, chunks.len());
        assert_eq!(ramp(0, 3), chunks[0].samples());
    }

    #[test]
    fn test_capture_length_truncates() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, rx) = chunk_queue(8, stats.clone());
        let mut src = ScriptedSource::new([
            Step::Samples(ramp(0, 6)),
            Step::Samples(ramp(6, 6)),
            Step::Samples(ramp(12, 6)),
        ]);
        let params = CaptureParams {
            max_samples: Some(10),
            ..params(4)
        };
        let summary = acquire(&mut src, &mut tx, &stop, &stats, &params).unwrap();
        drop(tx);
        assert!(summary.completed);
        assert_eq!(10, summary.samples);
        assert_eq!(1, src.remaining());
        let lens: Vec<_> = drain(rx).iter().map(|c| c.len()).collect();
        assert_eq!(vec![4, 4, 2], lens);
    }

    #[test]
    fn test_sustained_overflow_abort() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, _rx) = chunk_queue(8, stats.clone());
        let mut src = ScriptedSource::new(
            [Step::Overflow, Step::Overflow, Step::Samples(ramp(0, 1))]
                .into_iter()
                .chain(std::iter::repeat(Step::Overflow).take(5)),
        );
        let params = CaptureParams {
            overflow_warn_run: NonZeroU32::new(2).unwrap(),
            overflow_abort_run: Some(4),
            ..params(4)
        };
        let (summary, err) = acquire(&mut src, &mut tx, &stop, &stats, &params).unwrap_err();
        assert!(matches!(err, RecorderError::SustainedOverflow { run: 4 }));
        assert_eq!(6, summary.overflows);
        assert_eq!(1, summary.samples);
        // The ok batch in the middle reset the run
        assert_eq!(6, stats.overflow_count());
        assert_eq!(1, src.remaining());
        assert_eq!(1, stats.snapshot().samples_accepted);
    }

    #[test]
    fn test_full_queue_does_not_stall_acquisition() {
        let capacity = 3;
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        // Nobody reads the queue, as if compression were stuck
        let (mut tx, _rx) = chunk_queue(capacity, stats.clone());
        let steps = (0..=capacity as u64).map(|i| Step::Samples(ramp(i * 4, 4)));
        let mut src = ScriptedSource::new(steps).stop_when_exhausted(stop.clone());
        let params = params(4);
        let start = Instant::now();
        acquire(&mut src, &mut tx, &stop, &stats, &params).unwrap();
        assert!(start.elapsed() < params.receive_timeout);
        let snap = stats.snapshot();
        assert_eq!(capacity as u64, snap.chunks_accepted);
        assert_eq!(1, snap.chunks_dropped);
    }

    #[test]
    fn test_final_chunk_dropped_when_queue_stays_full() {
        let stop = StopHandle::new();
        let stats = Arc::new(PipelineStats::default());
        let (mut tx, _rx) = chunk_queue(1, stats.clone());
        let mut src = ScriptedSource::new([
            Step::Samples(ramp(0, 4)),
            Step::Samples(ramp(4, 2)),
        ])
        .stop_when_exhausted(stop.clone());
        let params = params(4);
        let start = Instant::now();
        let summary = acquire(&mut src, &mut tx, &stop, &stats, &params).unwrap();
        let elapsed = start.elapsed();
        // The flush waited for space, but no longer than one receive timeout
        assert!(elapsed >= params.receive_timeout);
        assert!(elapsed < params.receive_timeout * 5);
        assert_eq!(2, summary.chunks);
        let snap = stats.snapshot();
        assert_eq!(1, snap.chunks_accepted);
        assert_eq!(1, snap.chunks_dropped);
        assert_eq!(2, snap.samples_dropped);
    }

    #[test]
    fn test_progress_skips_crossed_steps() {
        let mut progress = Progress::new(Some(100));
        let batch = ramp(0, 4);
        let at = |samples| AcquisitionSummary {
            samples,
            ..Default::default()
        };
        assert!(!progress.update(&at(4), &batch, 0));
        // One batch jumped over ten steps
        assert!(progress.update(&at(50), &batch, 0));
        assert!(!progress.update(&at(52), &batch, 0));
        assert!(!progress.update(&at(54), &batch, 0));
        assert!(progress.update(&at(55), &batch, 0));
    }
}
