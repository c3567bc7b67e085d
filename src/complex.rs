use num_traits::{Float, Num};

#[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug)]
#[repr(C)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

impl<T: Num + Copy> Complex<T> {
    pub fn norm_sqr(&self) -> T {
        self.re * self.re + self.im * self.im
    }
}

/// The sample type coming out of the front-end (complex64, `fc32` on the wire)
pub type Sample = Complex<f32>;

/// Size of one sample on disk
pub const SAMPLE_BYTES: usize = 8;

/// Average power of a run of samples, zero for an empty slice
pub fn mean_power<T: Float>(samples: &[Complex<T>]) -> T {
    if samples.is_empty() {
        return T::zero();
    }
    let sum = samples.iter().fold(T::zero(), |acc, s| acc + s.norm_sqr());
    sum / T::from(samples.len()).unwrap_or_else(T::one)
}

/// Flatten samples into interleaved little-endian I/Q words, ready for
/// `as_byte_slice`
pub fn interleave(samples: &[Sample], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for s in samples {
        out.push(f32::from_bits(s.re.to_bits().to_le()));
        out.push(f32::from_bits(s.im.to_bits().to_le()));
    }
}

/// Inverse of [`interleave`] for raw bytes read back from disk. Trailing bytes
/// that don't form a whole sample are ignored.
pub fn samples_from_bytes(bytes: &[u8]) -> Vec<Sample> {
    bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|word| {
            let re = f32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            let im = f32::from_le_bytes([word[4], word[5], word[6], word[7]]);
            Sample::new(re, im)
        })
        .collect()
}
