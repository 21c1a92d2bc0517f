//! Wire sample format: mono 16-bit little-endian PCM carried as base64 text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    InvalidBase64(String),
}

impl fmt::Display for PcmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBase64(err) => write!(f, "invalid base64 audio payload: {err}"),
        }
    }
}

impl std::error::Error for PcmError {}

/// Clamp to [-1, 1] and scale asymmetrically so both rails are reachable.
pub fn float_sample_to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if clamped >= 0.0 {
        (clamped * i16::MAX as f32).round() as i16
    } else {
        (clamped * 32_768.0).round() as i16
    }
}

pub fn i16_to_float_sample(sample: i16) -> f32 {
    f32::from(sample) / 32_768.0
}

pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&float_sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Decode little-endian PCM16; a dangling odd byte is dropped.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16_to_float_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Outbound path: float frame to base64 PCM16.
pub fn encode_base64_frame(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16(samples))
}

/// Inbound path: base64 PCM16 to normalized float samples.
pub fn decode_base64_chunk(data: &str) -> Result<Vec<f32>, PcmError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|err| PcmError::InvalidBase64(err.to_string()))?;
    Ok(decode_pcm16(&bytes))
}
