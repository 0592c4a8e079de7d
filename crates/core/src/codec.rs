//! PCM conversions between capture floats, the 16-bit wire format and base64.
use crate::error::{Result, SessionError};
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Clamp to [-1, 1] and scale onto the full signed 16-bit range.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / 32768.0
}

/// Converts a slice of f32 samples to i16, reusing `out`.
pub fn convert_f32_to_i16_into(pcm32: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(pcm32.iter().map(|&s| sample_to_i16(s)));
}

/// A trait for converting audio sample types to little-endian bytes.
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len() * 2);
        for sample in self {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes a base64 string of 16-bit little-endian PCM into f32 samples.
pub fn decode_pcm16(base64_fragment: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_fragment)
        .map_err(|e| SessionError::Decode(format!("invalid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(SessionError::Decode("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Decode(format!(
            "odd PCM16 payload length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Average interleaved channels down to mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}
