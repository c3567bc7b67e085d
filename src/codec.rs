//! Block encoders applied by the compression workers
//!
//! Every block is encoded as a self-contained gzip member, xz stream or zstd
//! frame, so the output file is a plain concatenation that the standard
//! multi-member decoders read back as one stream.

use std::{fmt, io::Write, str::FromStr};

use flate2::{write::GzEncoder, Compression as GzLevel};
use serde::Deserialize;
use xz2::write::XzEncoder;

use crate::error::{CompressError, ConfigError};

/// Compression algorithm applied to each chunk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Lzma,
    Zstd,
}

impl Compression {
    /// Extension appended to the output file name
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Lzma => ".xz",
            Compression::Zstd => ".zst",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Lzma => "lzma",
            Compression::Zstd => "zstd",
        }
    }

    /// Check that `level` is meaningful for this algorithm
    pub fn validate_level(self, level: i32) -> Result<(), ConfigError> {
        let ok = match self {
            Compression::None => true,
            Compression::Gzip | Compression::Lzma => (0..=9).contains(&level),
            Compression::Zstd => zstd::compression_level_range().contains(&level),
        };
        if ok {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "compression level {level} is out of range for {self}"
            )))
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "lzma" | "xz" => Ok(Compression::Lzma),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression method '{other}'")),
        }
    }
}

/// Transform run by a worker on the raw bytes of one chunk.
///
/// Implementations must be stateless across calls: workers share one encoder
/// and may call it concurrently for any sequence number.
pub trait BlockEncoder: Send + Sync {
    fn encode(&self, seq: u64, raw: &[u8]) -> Result<Vec<u8>, CompressError>;
}

/// The stock encoder: one of the [`Compression`] algorithms at a fixed level
#[derive(Clone, Copy, Debug)]
pub struct Codec {
    pub compression: Compression,
    pub level: i32,
}

impl Codec {
    pub fn new(compression: Compression, level: i32) -> Self {
        Self { compression, level }
    }
}

impl BlockEncoder for Codec {
    fn encode(&self, _seq: u64, raw: &[u8]) -> Result<Vec<u8>, CompressError> {
        // Out of range levels are rejected by config validation, clamp for
        // encoders built by hand
        match self.compression {
            Compression::None => Ok(raw.to_vec()),
            Compression::Gzip => {
                let level = self.level.clamp(0, 9) as u32;
                let mut enc =
                    GzEncoder::new(Vec::with_capacity(raw.len() / 2), GzLevel::new(level));
                enc.write_all(raw)?;
                Ok(enc.finish()?)
            }
            Compression::Lzma => {
                let level = self.level.clamp(0, 9) as u32;
                let mut enc = XzEncoder::new(Vec::with_capacity(raw.len() / 2), level);
                enc.write_all(raw)?;
                Ok(enc.finish()?)
            }
            Compression::Zstd => Ok(zstd::bulk::compress(raw, self.level)?),
        }
    }
}
