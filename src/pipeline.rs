//! Parallel compression with in-order completion.
//!
//! The dispatcher takes chunks off the chunk queue in sequence order. For each
//! one it creates a one-shot result channel, pushes the receiving end (a
//! [`ResultHandle`]) onto the completion FIFO and only then hands the task to
//! the worker pool. Workers finish in any order, but the writer reads handles
//! in the order they were pushed, so file order is sequence order.

use std::{
    io::Write,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use byte_slice_cast::AsByteSlice;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::{
    chunk::{CompressedBlock, SampleChunk},
    codec::BlockEncoder,
    complex::interleave,
    error::RecorderError,
    exfil::write_ordered,
    monitoring::PipelineStats,
    queue::ChunkReceiver,
    recorder::StopHandle,
};

/// Eventual result of one compression task, in submission order
#[derive(Debug)]
pub struct ResultHandle {
    pub seq: u64,
    pub samples: usize,
    rx: Receiver<CompressedBlock>,
}

impl ResultHandle {
    /// Block until the worker resolves this task. A task whose worker went
    /// away without answering resolves to a placeholder.
    pub fn wait(self) -> CompressedBlock {
        match self.rx.recv() {
            Ok(block) => block,
            Err(_) => {
                error!(seq = self.seq, "Compression task vanished, writing placeholder");
                CompressedBlock::placeholder(self.seq, self.samples)
            }
        }
    }
}

pub struct CompressionTask {
    pub(crate) chunk: SampleChunk,
    pub(crate) reply: Sender<CompressedBlock>,
}

/// Create a task and the handle its result will arrive on
pub fn task(chunk: SampleChunk) -> (CompressionTask, ResultHandle) {
    let (reply, rx) = bounded(1);
    let handle = ResultHandle {
        seq: chunk.seq(),
        samples: chunk.len(),
        rx,
    };
    (CompressionTask { chunk, reply }, handle)
}

/// Move chunks from the chunk queue into the pool, recording each task's
/// handle on the completion FIFO at submission time
pub fn dispatch(
    chunks: ChunkReceiver,
    tasks: Sender<CompressionTask>,
    handles: Sender<ResultHandle>,
    stats: &PipelineStats,
) {
    for chunk in chunks {
        let (task, handle) = task(chunk);
        let (seq, samples) = (handle.seq, handle.samples);
        if handles.send(handle).is_err() {
            // Only happens if the writer died, nothing can be written anymore
            error!(seq, "Writer is gone, discarding chunk");
            stats.record_discarded(samples);
            continue;
        }
        // If every worker is gone the task is dropped here and its handle
        // resolves to a placeholder
        if tasks.send(task).is_err() {
            error!(seq, "No compression workers left");
        }
    }
    debug!("Dispatcher finished");
}

/// Encode one task, never panicking out of the worker
fn compress(
    encoder: &dyn BlockEncoder,
    chunk: &SampleChunk,
    words: &mut Vec<f32>,
) -> CompressedBlock {
    let seq = chunk.seq();
    interleave(chunk.samples(), words);
    let raw = words.as_byte_slice();
    let encoded = panic::catch_unwind(AssertUnwindSafe(|| encoder.encode(seq, raw)));
    match encoded {
        Ok(Ok(bytes)) => CompressedBlock {
            seq,
            samples: chunk.len(),
            bytes,
            failed: false,
        },
        Ok(Err(e)) => {
            warn!(seq, error = %e, "Compression failed, writing placeholder");
            CompressedBlock::placeholder(seq, chunk.len())
        }
        Err(_) => {
            warn!(seq, "Encoder panicked, writing placeholder");
            CompressedBlock::placeholder(seq, chunk.len())
        }
    }
}

fn compress_worker(
    id: usize,
    tasks: Receiver<CompressionTask>,
    encoder: Arc<dyn BlockEncoder>,
) {
    let mut words = Vec::new();
    let mut done = 0usize;
    for task in tasks {
        let block = compress(encoder.as_ref(), &task.chunk, &mut words);
        // The writer holds the other end until it has read this handle
        let _ = task.reply.send(block);
        done += 1;
    }
    debug!(worker = id, tasks = done, "Compression worker finished");
}

/// Everything downstream of the chunk queue: dispatcher, workers and writer
pub struct Pipeline {
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    writer: JoinHandle<std::io::Result<()>>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineParams {
    pub workers: usize,
    /// In-flight blocks between dispatcher and writer
    pub completion_capacity: usize,
}

impl Pipeline {
    /// Spawn the downstream threads. `sink` is owned by the writer thread
    /// from here on and flushed before it exits.
    pub fn start<W: Write + Send + 'static>(
        chunks: ChunkReceiver,
        encoder: Arc<dyn BlockEncoder>,
        sink: W,
        stats: Arc<PipelineStats>,
        stop: StopHandle,
        params: PipelineParams,
    ) -> Result<Self, RecorderError> {
        let (task_tx, task_rx) = bounded::<CompressionTask>(params.workers);
        let (handle_tx, handle_rx) = bounded::<ResultHandle>(params.completion_capacity);

        let mut workers = Vec::with_capacity(params.workers);
        for id in 0..params.workers {
            let rx = task_rx.clone();
            let encoder = encoder.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("compress-{id}"))
                    .spawn(move || compress_worker(id, rx, encoder))?,
            );
        }
        drop(task_rx);

        let writer_stats = stats.clone();
        let writer = thread::Builder::new()
            .name("writer".to_owned())
            .spawn(move || {
                let mut sink = sink;
                write_ordered(handle_rx, &mut sink, &writer_stats, &stop)
            })?;

        let dispatcher = thread::Builder::new()
            .name("dispatch".to_owned())
            .spawn(move || dispatch(chunks, task_tx, handle_tx, &stats))?;

        Ok(Self {
            dispatcher,
            workers,
            writer,
        })
    }

    /// Wait for every queued and in-flight chunk to reach the writer, then
    /// join all threads. The submitter must already be dropped or this never
    /// returns.
    pub fn finish(self) -> Result<(), RecorderError> {
        self.dispatcher
            .join()
            .map_err(|_| RecorderError::ThreadPanic("dispatch"))?;
        let mut panicked = false;
        for worker in self.workers {
            panicked |= worker.join().is_err();
        }
        let written = self
            .writer
            .join()
            .map_err(|_| RecorderError::ThreadPanic("writer"))?;
        written?;
        if panicked {
            return Err(RecorderError::ThreadPanic("compress"));
        }
        Ok(())
    }
}
