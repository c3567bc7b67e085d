//! The radio front-end interface and a simulated front-end

use std::{
    f32::consts::TAU,
    thread,
    time::{Duration, Instant},
};

use rand::prelude::*;
use tracing::{debug, info};

use crate::{complex::Sample, error::SourceError};

/// Requested front-end settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TuneRequest {
    pub frequency: f64,
    pub sample_rate: f64,
    pub gain: f64,
}

/// What the front-end actually tuned to
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TunedSettings {
    pub frequency: f64,
    pub sample_rate: f64,
    pub gain: f64,
}

/// Status code attached to every receive call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RxStatus {
    Ok,
    /// No data within the timeout
    Timeout,
    /// The front-end lost samples before handing them to us
    Overflow,
    Fatal(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receive {
    /// Valid samples written to the front of the buffer
    pub samples: usize,
    pub status: RxStatus,
}

impl Receive {
    pub fn ok(samples: usize) -> Self {
        Self {
            samples,
            status: RxStatus::Ok,
        }
    }

    pub fn empty(status: RxStatus) -> Self {
        Self { samples: 0, status }
    }
}

/// A streaming complex-sample producer
pub trait SampleSource: Send {
    /// Best-effort tune, returns the values the device actually uses
    fn configure(&mut self, request: &TuneRequest) -> Result<TunedSettings, SourceError>;
    fn start_streaming(&mut self) -> Result<(), SourceError>;
    fn stop_streaming(&mut self) -> Result<(), SourceError>;
    /// Fill the front of `buf`, waiting at most `timeout`
    fn receive(&mut self, buf: &mut [Sample], timeout: Duration) -> Receive;
}

// Gain range of the B2xx family of front-ends
const MAX_GAIN_DB: f64 = 76.0;
const MAX_SAMPLE_RATE: f64 = 56e6;

/// Software front-end producing a noisy tone at real-time pace
pub struct SimulatedSource {
    settings: Option<TunedSettings>,
    /// Tone offset from center as a fraction of the sample rate
    tone: f32,
    amplitude: f32,
    noise: f32,
    phase: f32,
    overflow_rate: f64,
    rng: StdRng,
    stream_start: Option<Instant>,
    produced: u64,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::with_seed(thread_rng().gen())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            settings: None,
            tone: 0.05,
            amplitude: 0.5,
            noise: 0.01,
            phase: 0.0,
            overflow_rate: 0.0,
            rng: StdRng::seed_from_u64(seed),
            stream_start: None,
            produced: 0,
        }
    }

    /// Probability that any receive call reports an overflow
    pub fn overflow_rate(mut self, rate: f64) -> Self {
        self.overflow_rate = rate.clamp(0.0, 1.0);
        self
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SimulatedSource {
    fn configure(&mut self, request: &TuneRequest) -> Result<TunedSettings, SourceError> {
        if !(request.sample_rate > 0.0) {
            return Err(SourceError::Configure(format!(
                "sample rate {} is not positive",
                request.sample_rate
            )));
        }
        let tuned = TunedSettings {
            frequency: request.frequency,
            sample_rate: request.sample_rate.min(MAX_SAMPLE_RATE),
            gain: request.gain.clamp(0.0, MAX_GAIN_DB),
        };
        debug!(?request, ?tuned, "Simulated front-end configured");
        self.settings = Some(tuned);
        Ok(tuned)
    }

    fn start_streaming(&mut self) -> Result<(), SourceError> {
        if self.settings.is_none() {
            return Err(SourceError::Streaming {
                action: "start",
                message: "front-end not configured".to_owned(),
            });
        }
        self.stream_start = Some(Instant::now());
        self.produced = 0;
        info!("Simulated stream started");
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), SourceError> {
        self.stream_start = None;
        info!(samples = self.produced, "Simulated stream stopped");
        Ok(())
    }

    fn receive(&mut self, buf: &mut [Sample], timeout: Duration) -> Receive {
        let (Some(start), Some(settings)) = (self.stream_start, self.settings) else {
            thread::sleep(timeout);
            return Receive::empty(RxStatus::Timeout);
        };
        // Pace production at the sample rate, a batch is due once the stream
        // clock has reached its last sample
        let due_secs = (self.produced + buf.len() as u64) as f64 / settings.sample_rate;
        let due = start + Duration::from_secs_f64(due_secs);
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Receive::empty(RxStatus::Timeout);
            }
            thread::sleep(wait);
        }
        if self.overflow_rate > 0.0 && self.rng.gen_bool(self.overflow_rate) {
            // The batch is lost but the stream clock keeps running
            self.produced += buf.len() as u64;
            return Receive::empty(RxStatus::Overflow);
        }
        let step = TAU * self.tone;
        for s in buf.iter_mut() {
            let (sin, cos) = self.phase.sin_cos();
            s.re = self.amplitude * cos + self.noise * (self.rng.gen::<f32>() - 0.5);
            s.im = self.amplitude * sin + self.noise * (self.rng.gen::<f32>() - 0.5);
            self.phase = (self.phase + step) % TAU;
        }
        self.produced += buf.len() as u64;
        Receive::ok(buf.len())
    }
}
