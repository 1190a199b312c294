//! Screen frame pipeline.
//!
//! On every tick of the 2 fps frame timer the current screen frame is scaled
//! to a bounded width and JPEG-encoded on the blocking pool. Ticks with no
//! usable frame are skipped.

use crate::media_event::MediaPacket;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use std::time::Duration;
use tracing::{trace, warn};

pub const FRAME_INTERVAL: Duration = Duration::from_millis(500);
pub const TARGET_WIDTH: u32 = 1024;
pub const JPEG_QUALITY: u8 = 50;

/// Gate and bookkeeping for outbound frames.
///
/// At most one frame is grabbed and encoded at a time, off the session loop;
/// a tick that finds one still in flight is skipped.
#[derive(Debug, Default)]
pub struct FrameCapturePipeline {
    armed: bool,
    in_flight: bool,
    frames_sent: u64,
}

impl FrameCapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Stop sending. A frame still being encoded is discarded when it lands.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.in_flight = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Claim the encoder for one tick. False while disarmed or busy.
    pub fn begin(&mut self) -> bool {
        if !self.armed || self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Accept the result of the encode started by [`begin`](Self::begin).
    pub fn finish(&mut self, packet: Option<MediaPacket>) -> Option<MediaPacket> {
        self.in_flight = false;
        if !self.armed {
            return None;
        }
        let packet = packet?;
        self.frames_sent += 1;
        trace!("Frame #{} ({} bytes)", self.frames_sent, packet.bytes().len());
        Some(packet)
    }
}

/// Turn one polled frame into a JPEG packet, if there is anything to send.
///
/// CPU bound; run it on the blocking pool.
pub fn encode_frame(frame: Option<RgbaImage>) -> Option<MediaPacket> {
    let frame = frame?;
    if frame.width() == 0 || frame.height() == 0 {
        trace!("Skipping empty frame");
        return None;
    }
    match encode_jpeg(&downscale(&frame), JPEG_QUALITY) {
        Ok(jpeg) => Some(MediaPacket::Frame(jpeg)),
        Err(e) => {
            warn!("JPEG encoding failed: {}", e);
            None
        }
    }
}

/// Scale to `TARGET_WIDTH` keeping the aspect ratio. Narrower frames are
/// left as they are.
pub fn downscale(frame: &RgbaImage) -> RgbaImage {
    let (w, h) = frame.dimensions();
    if w <= TARGET_WIDTH {
        return frame.clone();
    }
    let height = ((h as f64 * TARGET_WIDTH as f64 / w as f64).round() as u32).max(1);
    imageops::resize(frame, TARGET_WIDTH, height, FilterType::Triangle)
}

pub fn encode_jpeg(frame: &RgbaImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&rgb)?;
    Ok(jpeg)
}
