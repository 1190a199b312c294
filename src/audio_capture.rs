//! Microphone capture pipeline.
//!
//! Sources deliver float samples in whatever block size they read; the
//! [`FrameChunker`] regroups them into fixed 4096-sample frames at 16 kHz and
//! the [`AudioCapturePipeline`] turns each frame into an outbound PCM16 packet
//! while the session is live.

use crate::media_event::MediaPacket;
use crate::pcm;
use tracing::trace;

pub const INPUT_SAMPLE_RATE: u32 = 16_000;
pub const FRAME_SAMPLES: usize = 4096;

/// Regroups arbitrary sample blocks into `FRAME_SAMPLES`-sized frames.
#[derive(Debug, Default)]
pub struct FrameChunker {
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    /// Append samples and return every complete frame now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / FRAME_SAMPLES;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            let rest = self.pending.split_off(FRAME_SAMPLES);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Converts armed microphone frames into media packets.
#[derive(Debug, Default)]
pub struct AudioCapturePipeline {
    armed: bool,
    frames_sent: u64,
}

impl AudioCapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Encode one frame. Frames arriving while disarmed are dropped.
    pub fn process(&mut self, samples: &[f32]) -> Option<MediaPacket> {
        if !self.armed || samples.is_empty() {
            return None;
        }
        self.frames_sent += 1;
        trace!("Mic frame #{} ({} samples)", self.frames_sent, samples.len());
        Some(encode_frame(samples))
    }
}

/// PCM16 little-endian packet for one frame.
pub fn encode_frame(samples: &[f32]) -> MediaPacket {
    MediaPacket::Audio(pcm::encode(samples))
}
