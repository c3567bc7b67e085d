//! Units of work moving through the pipeline

use std::{mem, num::NonZeroUsize};

use crate::complex::Sample;

/// A run of samples moved through the pipeline as one unit.
///
/// Chunks are immutable once built and are moved, never shared, from stage to
/// stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    seq: u64,
    samples: Vec<Sample>,
}

impl SampleChunk {
    pub fn new(seq: u64, samples: Vec<Sample>) -> Self {
        Self { seq, samples }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The encoded form of one chunk, as it lands in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlock {
    pub seq: u64,
    /// Samples in the source chunk
    pub samples: usize,
    pub bytes: Vec<u8>,
    /// Placeholder for a chunk whose encode failed, `bytes` is empty
    pub failed: bool,
}

impl CompressedBlock {
    pub fn placeholder(seq: u64, samples: usize) -> Self {
        Self {
            seq,
            samples,
            bytes: Vec::new(),
            failed: true,
        }
    }
}

/// Gathers received batches into fixed-size chunks and numbers them
#[derive(Debug)]
pub struct Accumulator {
    chunk_size: usize,
    buf: Vec<Sample>,
    next_seq: u64,
}

impl Accumulator {
    pub fn new(chunk_size: NonZeroUsize) -> Self {
        let chunk_size = chunk_size.get();
        Self {
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            next_seq: 0,
        }
    }

    /// Append a batch, handing every completed chunk to `emit`. A batch that
    /// crosses a chunk boundary is split, the tail starts the next chunk.
    pub fn push(&mut self, mut samples: &[Sample], mut emit: impl FnMut(SampleChunk)) {
        while !samples.is_empty() {
            let take = (self.chunk_size - self.buf.len()).min(samples.len());
            self.buf.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.buf.len() == self.chunk_size {
                emit(self.take_chunk());
            }
        }
    }

    /// Package whatever is buffered as a short chunk
    pub fn flush(&mut self) -> Option<SampleChunk> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take_chunk())
        }
    }

    /// Samples waiting for the current chunk to fill
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Sequence number the next chunk will carry
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn take_chunk(&mut self) -> SampleChunk {
        let samples = mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        let chunk = SampleChunk::new(self.next_seq, samples);
        self.next_seq += 1;
        chunk
    }
}
