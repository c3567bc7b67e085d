//! Test fixtures shared across modules

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::{self, Read, Write},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

use crate::{
    chunk::CompressedBlock,
    codec::{BlockEncoder, Codec, Compression},
    complex::Sample,
    error::{CompressError, SourceError},
    pipeline::CompressionTask,
    recorder::StopHandle,
    source::{Receive, RxStatus, SampleSource, TuneRequest, TunedSettings},
};

/// `len` samples where sample `i` is `(i, -i)`, starting from `start`
pub fn ramp(start: u64, len: u64) -> Vec<Sample> {
    (start..start + len)
        .map(|i| Sample::new(i as f32, -(i as f32)))
        .collect()
}

/// Decode a whole data file, however many blocks it holds
pub fn decode(compression: Compression, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    match compression {
        Compression::None => out.extend_from_slice(bytes),
        Compression::Gzip => {
            MultiGzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        }
        Compression::Lzma => {
            XzDecoder::new_multi_decoder(bytes)
                .read_to_end(&mut out)
                .unwrap();
        }
        Compression::Zstd => {
            zstd::stream::read::Decoder::new(bytes)
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
        }
    }
    out
}

/// Encoder that sleeps a per-sequence delay before encoding
pub struct DelayedEncoder {
    codec: Codec,
    delays: HashMap<u64, u64>,
    /// Sequence numbers in the order their encode finished
    pub finished: Arc<Mutex<Vec<u64>>>,
}

impl DelayedEncoder {
    pub fn new(codec: Codec, delays_ms: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            codec,
            delays: delays_ms.into_iter().collect(),
            finished: Default::default(),
        }
    }
}

impl BlockEncoder for DelayedEncoder {
    fn encode(&self, seq: u64, raw: &[u8]) -> Result<Vec<u8>, CompressError> {
        if let Some(&ms) = self.delays.get(&seq) {
            thread::sleep(Duration::from_millis(ms));
        }
        let out = self.codec.encode(seq, raw);
        self.finished.lock().unwrap().push(seq);
        out
    }
}

/// Encoder that fails the given sequence numbers
pub struct FailingEncoder {
    codec: Codec,
    fail: HashSet<u64>,
}

impl FailingEncoder {
    pub fn new(codec: Codec, fail: impl IntoIterator<Item = u64>) -> Self {
        Self {
            codec,
            fail: fail.into_iter().collect(),
        }
    }
}

impl BlockEncoder for FailingEncoder {
    fn encode(&self, seq: u64, raw: &[u8]) -> Result<Vec<u8>, CompressError> {
        if self.fail.contains(&seq) {
            return Err(CompressError::Other(format!("injected failure for {seq}")));
        }
        self.codec.encode(seq, raw)
    }
}

/// In-memory sink that stays readable after the writer thread takes it
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that accepts `limit` bytes and then stops making progress, as a full
/// disk would
pub struct FailingSink {
    limit: usize,
    written: usize,
}

impl FailingSink {
    pub fn new(limit: usize) -> Self {
        Self { limit, written: 0 }
    }
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.limit - self.written);
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Answer a task by hand with `bytes` as its encoded block
pub fn resolve(task: CompressionTask, bytes: &[u8]) {
    let block = CompressedBlock {
        seq: task.chunk.seq(),
        samples: task.chunk.len(),
        bytes: bytes.to_vec(),
        failed: false,
    };
    task.reply.send(block).unwrap();
}

/// One scripted receive outcome
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Samples(Vec<Sample>),
    Timeout,
    Overflow,
    Fatal(String),
}

/// Front-end that plays back a fixed list of receive outcomes.
///
/// Once the script runs out every call times out; with
/// [`ScriptedSource::stop_when_exhausted`] the end of the script also requests
/// a stop, which is how tests end a run at an exact point in the stream.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    on_exhausted: Option<StopHandle>,
    pub calls: usize,
    pub streaming: bool,
    pub start_calls: usize,
    pub stop_calls: usize,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            on_exhausted: None,
            calls: 0,
            streaming: false,
            start_calls: 0,
            stop_calls: 0,
        }
    }

    pub fn stop_when_exhausted(mut self, handle: StopHandle) -> Self {
        self.on_exhausted = Some(handle);
        self
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl SampleSource for ScriptedSource {
    fn configure(&mut self, request: &TuneRequest) -> Result<TunedSettings, SourceError> {
        Ok(TunedSettings {
            frequency: request.frequency,
            sample_rate: request.sample_rate,
            gain: request.gain,
        })
    }

    fn start_streaming(&mut self) -> Result<(), SourceError> {
        self.streaming = true;
        self.start_calls += 1;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), SourceError> {
        self.streaming = false;
        self.stop_calls += 1;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [Sample], timeout: Duration) -> Receive {
        self.calls += 1;
        match self.steps.pop_front() {
            Some(Step::Samples(samples)) => {
                let n = samples.len().min(buf.len());
                buf[..n].copy_from_slice(&samples[..n]);
                Receive::ok(n)
            }
            Some(Step::Timeout) => Receive::empty(RxStatus::Timeout),
            Some(Step::Overflow) => Receive::empty(RxStatus::Overflow),
            Some(Step::Fatal(msg)) => Receive::empty(RxStatus::Fatal(msg)),
            None => {
                match &self.on_exhausted {
                    Some(handle) => {
                        handle.stop();
                    }
                    None => thread::sleep(timeout),
                }
                Receive::empty(RxStatus::Timeout)
            }
        }
    }
}

mod tests {
    use super::*;

    #[test]
    fn test_scripted_playback() {
        let stop = StopHandle::new();
        let mut src = ScriptedSource::new([
            Step::Samples(vec![Sample::new(1.0, 2.0); 3]),
            Step::Overflow,
        ])
        .stop_when_exhausted(stop.clone());
        let mut buf = [Sample::default(); 2];
        let timeout = Duration::from_millis(1);
        // Longer scripted batches are cut to the buffer
        assert_eq!(Receive::ok(2), src.receive(&mut buf, timeout));
        assert_eq!(RxStatus::Overflow, src.receive(&mut buf, timeout).status);
        assert!(!stop.is_stopped());
        assert_eq!(RxStatus::Timeout, src.receive(&mut buf, timeout).status);
        assert!(stop.is_stopped());
        assert_eq!(3, src.calls);
    }
}
