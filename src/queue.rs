//! The chunk queue between acquisition and compression.
//!
//! Acquisition must never wait on compression: a blocked receive loop lets the
//! front-end overflow, which loses more than one queued chunk would. So the
//! producing side only ever tries a push, and a full ring means the chunk is
//! dropped and counted. Chunks that do get in are owned by the pipeline from
//! then on and always reach the writer.

use std::{
    hint,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rtrb::{PopError, PushError, RingBuffer};
use tracing::{trace, warn};

use crate::{chunk::SampleChunk, monitoring::PipelineStats};

// Consumer backoff when the ring is empty
const SPIN_LIMIT: u32 = 64;
const YIELD_LIMIT: u32 = 128;
const IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Returned when a chunk was refused because the ring was full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    pub seq: u64,
    pub samples: usize,
}

/// Build a chunk queue holding at most `capacity` chunks
pub fn chunk_queue(
    capacity: usize,
    stats: Arc<PipelineStats>,
) -> (ChunkSubmitter, ChunkReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        ChunkSubmitter {
            producer,
            stats,
            capacity,
        },
        ChunkReceiver { consumer },
    )
}

/// Producing half, owned by the acquisition loop
pub struct ChunkSubmitter {
    producer: rtrb::Producer<SampleChunk>,
    stats: Arc<PipelineStats>,
    capacity: usize,
}

impl ChunkSubmitter {
    /// Hand a chunk to compression without blocking
    pub fn submit(&mut self, chunk: SampleChunk) -> Result<(), QueueFull> {
        let (seq, samples) = (chunk.seq(), chunk.len());
        match self.producer.push(chunk) {
            Ok(()) => {
                self.stats.record_accepted(samples);
                trace!(seq, samples, "Chunk queued");
                Ok(())
            }
            Err(PushError::Full(_)) => {
                self.stats.record_dropped(samples);
                warn!(
                    seq,
                    samples,
                    dropped = self.stats.chunks_dropped(),
                    "Compression queue full, dropping chunk"
                );
                Err(QueueFull { seq, samples })
            }
        }
    }

    /// Like [`ChunkSubmitter::submit`] but retries for up to `timeout` before
    /// dropping. Only for the final flush, once the front-end is no longer
    /// being read.
    pub fn submit_timeout(
        &mut self,
        chunk: SampleChunk,
        timeout: Duration,
    ) -> Result<(), QueueFull> {
        let start = Instant::now();
        let samples = chunk.len();
        let mut chunk = chunk;
        let mut idle = 0u32;
        while start.elapsed() < timeout && !self.producer.is_abandoned() {
            match self.producer.push(chunk) {
                Ok(()) => {
                    self.stats.record_accepted(samples);
                    return Ok(());
                }
                Err(PushError::Full(back)) => chunk = back,
            }
            backoff(&mut idle);
        }
        self.submit(chunk)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks currently waiting in the ring
    pub fn queued(&self) -> usize {
        self.capacity - self.producer.slots()
    }
}

/// Consuming half, owned by the dispatcher
pub struct ChunkReceiver {
    consumer: rtrb::Consumer<SampleChunk>,
}

impl ChunkReceiver {
    /// Next chunk in queue order, waiting while the ring is empty. Returns
    /// `None` once the submitter is gone and everything it queued was taken.
    pub fn recv(&mut self) -> Option<SampleChunk> {
        let mut idle = 0u32;
        loop {
            match self.consumer.pop() {
                Ok(chunk) => return Some(chunk),
                Err(PopError::Empty) => {
                    if self.consumer.is_abandoned() {
                        // Catch a push that raced the producer going away
                        return self.consumer.pop().ok();
                    }
                    backoff(&mut idle);
                }
            }
        }
    }
}

impl Iterator for ChunkReceiver {
    type Item = SampleChunk;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

fn backoff(idle: &mut u32) {
    if *idle < SPIN_LIMIT {
        hint::spin_loop();
    } else if *idle < YIELD_LIMIT {
        thread::yield_now();
    } else {
        thread::sleep(IDLE_SLEEP);
    }
    *idle = idle.saturating_add(1);
}
