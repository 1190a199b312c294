//! Gapless playback scheduling
//!
//! Decoded agent speech is laid onto a single timeline on the output clock.
//! Every chunk starts at `max(next_start_time, now)` and pushes
//! `next_start_time` forward by its duration, so chunks play back to back
//! with no gap and never overlap, even when the scheduler has been idle.
//! An interruption force-stops every live slot and rewinds the timeline.

use crate::error::{Result, SessionError};
use crate::media_event::SessionEvent;
use crate::pcm::AudioBuffer;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sample rate of synthesized speech from the agent.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const OUTPUT_CHANNELS: usize = 1;

/// A device that plays buffers at given times on its own clock.
///
/// Natural completion of a slot must be reported back to the session loop as
/// [`SessionEvent::PlaybackEnded`]. A slot that was stopped must not report.
pub trait AudioOutput: Send {
    /// Seconds since the output was opened.
    fn current_time(&self) -> f64;

    fn play(&mut self, slot: u64, buffer: AudioBuffer, at: f64) -> Result<()>;

    fn stop(&mut self, slot: u64);

    /// Release the device. A newly opened output starts its clock at zero.
    fn close(&mut self);
}

/// A buffer scheduled on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSlot {
    pub id: u64,
    pub start_time: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    output: Option<Box<dyn AudioOutput>>,
    next_start_time: f64,
    live: BTreeMap<u64, PlaybackSlot>,
    next_slot: u64,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self {
            output: None,
            next_start_time: 0.0,
            live: BTreeMap::new(),
            next_slot: 0,
        }
    }

    /// Take ownership of the output used for this session.
    pub fn attach(&mut self, output: Box<dyn AudioOutput>) {
        self.shutdown();
        self.output = Some(output);
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn live_slots(&self) -> impl Iterator<Item = &PlaybackSlot> {
        self.live.values()
    }

    pub fn is_playing(&self) -> bool {
        !self.live.is_empty()
    }

    /// Schedule `buffer` right after everything already queued.
    ///
    /// Returns `None` when no output is attached or the device refused the
    /// buffer; the timeline is left untouched in that case.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Option<PlaybackSlot> {
        let output = self.output.as_mut()?;
        let now = output.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration();

        self.next_slot += 1;
        let id = self.next_slot;
        if let Err(e) = output.play(id, buffer, start_time) {
            warn!("Output rejected audio chunk: {}", e);
            return None;
        }

        let slot = PlaybackSlot {
            id,
            start_time,
            duration,
        };
        self.next_start_time = start_time + duration;
        self.live.insert(id, slot);
        debug!(
            "Scheduled slot {} at {:.3}s for {:.3}s ({} live)",
            id,
            start_time,
            duration,
            self.live.len()
        );
        Some(slot)
    }

    /// A slot finished on its own. Returns true when this emptied the live
    /// set, i.e. the agent finished speaking.
    pub fn on_slot_ended(&mut self, id: u64) -> bool {
        self.live.remove(&id).is_some() && self.live.is_empty()
    }

    /// Hard-stop every live slot and rewind the timeline to zero.
    pub fn stop_all(&mut self) {
        if let Some(output) = self.output.as_mut() {
            for id in self.live.keys() {
                output.stop(*id);
            }
        }
        if !self.live.is_empty() {
            debug!("Force-stopped {} playback slots", self.live.len());
        }
        self.live.clear();
        self.next_start_time = 0.0;
    }

    /// Stop everything and release the output.
    pub fn shutdown(&mut self) {
        self.stop_all();
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }
}

/// Output that keeps a real-time clock and reports completions without
/// producing sound. Used when no playback device is configured.
pub struct SilentOutput {
    opened: Instant,
    epoch: u64,
    events: UnboundedSender<SessionEvent>,
    timers: HashMap<u64, JoinHandle<()>>,
}

impl SilentOutput {
    pub fn new(epoch: u64, events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            opened: Instant::now(),
            epoch,
            events,
            timers: HashMap::new(),
        }
    }
}

impl AudioOutput for SilentOutput {
    fn current_time(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn play(&mut self, slot: u64, buffer: AudioBuffer, at: f64) -> Result<()> {
        let end = at + buffer.duration();
        if !end.is_finite() || end < 0.0 {
            return Err(SessionError::decode(format!("bad playback end time {}", end)));
        }
        let deadline = self.opened + std::time::Duration::from_secs_f64(end);
        let events = self.events.clone();
        let epoch = self.epoch;
        self.timers.retain(|_, t| !t.is_finished());
        self.timers.insert(
            slot,
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                let _ = events.send(SessionEvent::PlaybackEnded { epoch, slot });
            }),
        );
        Ok(())
    }

    fn stop(&mut self, slot: u64) {
        if let Some(timer) = self.timers.remove(&slot) {
            timer.abort();
        }
    }

    fn close(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}
