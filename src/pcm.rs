//! PCM16 codec
//!
//! Converts between `f32` samples in [-1, 1] and 16-bit little-endian PCM,
//! the format the Live API expects for microphone input (16 kHz mono) and
//! returns for synthesized speech (24 kHz mono). Payloads travel inside JSON
//! text frames, so this module also owns the base64 text transport.

use crate::error::{Result, SessionError};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

/// Standard alphabet, padded on encode, accepts padded or unpadded input.
const B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const NEG_SCALE: f32 = 0x8000 as f32;
const POS_SCALE: f32 = 0x7FFF as f32;

/// Encode samples as 16-bit little-endian PCM.
///
/// Negative samples scale by 0x8000 and positive ones by 0x7FFF so that both
/// ends of the range map exactly onto `i16::MIN` and `i16::MAX`. Values are
/// rounded to the nearest step, so the output is not bit-identical to
/// encoders that truncate (0.5 gives 16384 here, 16383 when truncated).
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
        let v = if s < 0.0 {
            (s * NEG_SCALE).round()
        } else {
            (s * POS_SCALE).round()
        };
        out.extend_from_slice(&(v as i16).to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM back to `f32` samples.
///
/// A trailing odd byte is ignored.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| sample_to_f32(i16::from_le_bytes([b[0], b[1]])))
        .collect()
}

fn sample_to_f32(v: i16) -> f32 {
    if v < 0 {
        v as f32 / NEG_SCALE
    } else {
        v as f32 / POS_SCALE
    }
}

/// Decoded, playable audio: one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Samples interleaved frame by frame, ready for a device write.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

/// Reinterpret raw interleaved PCM16 bytes as an [`AudioBuffer`].
pub fn bytes_to_audio_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<AudioBuffer> {
    if channel_count == 0 {
        return Err(SessionError::decode("channel count must be at least 1"));
    }
    if sample_rate == 0 {
        return Err(SessionError::decode("sample rate must be positive"));
    }
    let frame_bytes = 2 * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(SessionError::decode(format!(
            "{} bytes is not a whole number of {}-channel PCM16 frames",
            bytes.len(),
            channel_count
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for (i, sample) in decode(bytes).into_iter().enumerate() {
        channels[i % channel_count].push(sample);
    }
    Ok(AudioBuffer::new(sample_rate, channels))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    Ok(B64.decode(text.trim())?)
}
