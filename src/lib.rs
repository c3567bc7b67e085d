//! Record a complex-baseband sample stream to disk with parallel per-chunk
//! compression.
//!
//! Samples flow front-end -> [`capture`] -> [`queue`] -> [`pipeline`] workers
//! -> [`exfil`] writer, all driven by a [`recorder::Recorder`].

pub mod args;
pub mod capture;
pub mod chunk;
pub mod codec;
pub mod complex;
pub mod config;
pub mod error;
pub mod exfil;
pub mod monitoring;
pub mod pipeline;
pub mod queue;
pub mod recorder;
pub mod source;
#[cfg(test)]
mod testing;

pub use codec::{BlockEncoder, Codec, Compression};
pub use config::RecorderConfig;
pub use error::RecorderError;
pub use recorder::{Recorder, RecorderState, RecordingOutcome, StopHandle};
pub use source::{SampleSource, SimulatedSource};
