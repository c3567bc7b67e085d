//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

use crate::{codec::Compression, config::RecorderConfig};

/// Flags left unset keep the value from the config file, or the default
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// TOML file with recorder settings, overridden by the flags below
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Center frequency in Hz
    #[clap(short, long)]
    pub frequency: Option<f64>,
    /// Sample rate in Hz
    #[clap(short, long)]
    pub sample_rate: Option<f64>,
    /// RF gain in dB
    #[clap(short, long)]
    pub gain: Option<f64>,
    /// Recording length in seconds, record until Ctrl-C if unset
    #[clap(short, long)]
    pub time: Option<f64>,
    /// Output file, the compression extension is appended
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// Compression method (none, gzip, lzma, zstd)
    #[clap(short, long)]
    pub compression: Option<Compression>,
    /// Compression level (0-9 for gzip/lzma, zstd accepts its own range)
    #[clap(short = 'l', long)]
    pub compression_level: Option<i32>,
    /// Samples per compression chunk
    #[clap(long)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: Option<u64>,
    /// Compression threads, defaults to one less than the core count
    #[clap(long)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub threads: Option<u64>,
    /// Receive timeout in seconds
    #[clap(long)]
    pub timeout: Option<f64>,
    /// Chunks that may wait for compression before new ones are dropped
    #[clap(long)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub queue_capacity: Option<u64>,
    /// Probability of an injected overflow per receive on the simulated
    /// front-end
    #[clap(long, default_value_t = 0.0)]
    pub overflow_rate: f64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    /// Override `config` with every flag that was given
    pub fn apply(&self, config: &mut RecorderConfig) {
        if let Some(v) = self.frequency {
            config.frequency = v;
        }
        if let Some(v) = self.sample_rate {
            config.sample_rate = v;
        }
        if let Some(v) = self.gain {
            config.gain = v;
        }
        if let Some(v) = self.time {
            config.duration = Some(v);
        }
        if let Some(v) = &self.output {
            config.output = v.clone();
        }
        if let Some(v) = self.compression {
            config.compression = v;
        }
        if let Some(v) = self.compression_level {
            config.compression_level = v;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = v as usize;
        }
        if let Some(v) = self.threads {
            config.workers = Some(v as usize);
        }
        if let Some(v) = self.timeout {
            config.receive_timeout = v;
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v as usize;
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
