//! Session controller
//!
//! Owns every per-session resource (transport, capture tracks, playback) and
//! reacts to [`SessionEvent`]s one at a time. Lifecycle:
//!
//! ```text
//! Idle --start--> Connecting --Open--> Active --stop/close--> Idle
//!                     |                   |
//!                     +----- error -------+--> Error --teardown--> Idle
//! ```
//!
//! Events from collaborators carry an epoch. Teardown bumps the epoch, so
//! anything still in flight from an old session is recognised and dropped.
//! Observable changes are queued and collected with [`Session::drain_updates`].

use crate::audio_capture::AudioCapturePipeline;
use crate::devices::{CaptureTrack, EventSink, MediaDevices, ScreenTrack};
use crate::error::{Result, SessionError};
use crate::gemini::{ClientMessage, FunctionCall, LiveConfig, ServerMessage, ToolResponse};
use crate::gemini_client::{Connector, Transport};
use crate::media_event::{
    MediaPacket, SessionEvent, SessionStatus, SessionUpdate, TrackKind, TransportEvent,
};
use crate::overlay::AnnotationOverlay;
use crate::pcm;
use crate::playback::{PlaybackScheduler, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::router;
use crate::tools;
use crate::transcript::TranscriptWindow;
use crate::video_capture::{self, FrameCapturePipeline};
use std::sync::{Arc, Mutex, TryLockError};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// The screen is polled from the blocking pool, so it is shared with the
/// frame task for the duration of a grab.
type SharedScreen = Arc<Mutex<Box<dyn ScreenTrack>>>;

pub struct Session {
    config: LiveConfig,
    connector: Box<dyn Connector>,
    devices: Box<dyn MediaDevices>,
    /// Handed to collaborators so they can report back into the loop
    events: EventSink,
    epoch: u64,
    status: SessionStatus,
    error: Option<String>,

    transport: Option<Box<dyn Transport>>,
    microphone: Option<Box<dyn CaptureTrack>>,
    screen: Option<SharedScreen>,
    audio: AudioCapturePipeline,
    frames: FrameCapturePipeline,
    playback: PlaybackScheduler,

    transcript: TranscriptWindow,
    overlay: AnnotationOverlay,
    /// Pending observable changes (drained after each event)
    updates: Vec<SessionUpdate>,
}

impl Session {
    pub fn new(
        config: LiveConfig,
        connector: Box<dyn Connector>,
        devices: Box<dyn MediaDevices>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            connector,
            devices,
            events,
            epoch: 0,
            status: SessionStatus::Idle,
            error: None,
            transport: None,
            microphone: None,
            screen: None,
            audio: AudioCapturePipeline::new(),
            frames: FrameCapturePipeline::new(),
            playback: PlaybackScheduler::new(),
            transcript: TranscriptWindow::default(),
            overlay: AnnotationOverlay::new(),
            updates: Vec::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Message of the error that ended or blocked the last session.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn transcript(&self) -> &TranscriptWindow {
        &self.transcript
    }

    pub fn overlay(&self) -> &AnnotationOverlay {
        &self.overlay
    }

    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn next_marker_deadline(&self) -> Option<Instant> {
        self.overlay.next_deadline()
    }

    /// Take every update queued since the last call.
    pub fn drain_updates(&mut self) -> Vec<SessionUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Process one event.
    pub fn on_event(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Start => self.start(),
            SessionEvent::Stop | SessionEvent::Shutdown => self.stop(),
            SessionEvent::Transport { epoch, event } if epoch == self.epoch => {
                self.on_transport(event, now)
            }
            SessionEvent::MicFrame { epoch, samples } if epoch == self.epoch => {
                self.on_mic_frame(&samples)
            }
            SessionEvent::FrameEncoded { epoch, packet } if epoch == self.epoch => {
                self.on_frame_encoded(packet)
            }
            SessionEvent::TrackEnded { epoch, kind } if epoch == self.epoch => {
                self.on_track_ended(kind)
            }
            SessionEvent::PlaybackEnded { epoch, slot } if epoch == self.epoch => {
                if self.playback.on_slot_ended(slot) {
                    debug!("🔇 Agent finished speaking");
                    self.publish(SessionUpdate::AgentSpeaking(false));
                }
            }
            stale => debug!("Dropping stale event {:?}", EventLabel(&stale)),
        }
    }

    /// Open devices and connect. A running session is torn down first.
    pub fn start(&mut self) {
        if self.status != SessionStatus::Idle {
            info!("Restarting: tearing down the current session first");
        }
        self.teardown();
        self.error = None;

        let Some(api_key) = self.config.credential().map(str::to_string) else {
            return self.fail(SessionError::CredentialMissing);
        };

        info!("🔌 Starting session (epoch {})", self.epoch);
        self.set_status(SessionStatus::Connecting, None);

        if let Err(e) = self.acquire_media() {
            return self.fail(e);
        }

        match self
            .connector
            .connect(&self.config, &api_key, self.epoch, self.events.clone())
        {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => self.fail(e),
        }
    }

    /// End the session and return to Idle. Idempotent.
    pub fn stop(&mut self) {
        self.teardown();
        self.error = None;
        if self.status != SessionStatus::Idle {
            info!("⏹️  Session stopped");
            self.set_status(SessionStatus::Idle, None);
        }
    }

    /// Grab and encode one screen frame on the blocking pool. Only acts while
    /// live; the packet comes back as [`SessionEvent::FrameEncoded`].
    pub fn on_frame_tick(&mut self) {
        if self.status != SessionStatus::Active {
            return;
        }
        let Some(screen) = self.screen.clone() else {
            return;
        };
        if !self.frames.begin() {
            trace!("Frame tick skipped");
            return;
        }
        let epoch = self.epoch;
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            let frame = match screen.lock() {
                Ok(mut track) => track.current_frame(),
                Err(_) => None,
            };
            let packet = video_capture::encode_frame(frame);
            let _ = events.send(SessionEvent::FrameEncoded { epoch, packet });
        });
    }

    /// Expire markers whose time is up.
    pub fn sweep_markers(&mut self, now: Instant) {
        if self.overlay.sweep(now) {
            self.publish(SessionUpdate::Markers(self.overlay.markers()));
        }
    }

    fn acquire_media(&mut self) -> Result<()> {
        let epoch = self.epoch;
        self.microphone = Some(self.devices.open_microphone(epoch, self.events.clone())?);
        let output = self.devices.open_output(epoch, self.events.clone())?;
        self.playback.attach(output);
        let screen = self.devices.open_screen(epoch, self.events.clone())?;
        self.screen = Some(Arc::new(Mutex::new(screen)));
        Ok(())
    }

    fn on_transport(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Open => {
                if self.status != SessionStatus::Connecting {
                    debug!("Ignoring Open while {:?}", self.status);
                    return;
                }
                info!("🟢 Session active");
                self.set_status(SessionStatus::Active, None);
                self.audio.arm();
                self.frames.arm();
            }
            TransportEvent::Message(msg) => {
                if self.status == SessionStatus::Active {
                    self.on_server_message(&msg, now);
                } else {
                    debug!("Ignoring server message while {:?}", self.status);
                }
            }
            TransportEvent::Error(reason) => self.on_transport_error(reason),
            TransportEvent::Closed => {
                info!("Connection closed by server");
                self.stop();
            }
        }
    }

    fn on_transport_error(&mut self, reason: String) {
        let message = SessionError::transport(reason).user_message();
        error!("❌ {}", message);
        self.set_status(SessionStatus::Error, Some(message.clone()));
        self.teardown();
        self.error = Some(message.clone());
        self.set_status(SessionStatus::Idle, Some(message));
    }

    /// Apply one inbound message: transcript, audio, interruption, tool calls.
    fn on_server_message(&mut self, msg: &ServerMessage, now: Instant) {
        let routed = router::route(msg);

        if let Some((sender, text)) = routed.transcript {
            debug!("💬 {:?}: {}", sender, text);
            self.transcript.push(sender, text);
            self.publish(SessionUpdate::Transcript(self.transcript.snapshot()));
        }

        for payload in &routed.audio {
            self.play_chunk(payload);
        }

        if routed.interrupted {
            info!("✋ Agent interrupted");
            let was_playing = self.playback.is_playing();
            self.playback.stop_all();
            if was_playing {
                self.publish(SessionUpdate::AgentSpeaking(false));
            }
        }

        for call in &routed.tool_calls {
            self.run_tool(call, now);
        }
    }

    fn play_chunk(&mut self, payload: &str) {
        let buffer = match pcm::decode_base64(payload)
            .and_then(|bytes| pcm::bytes_to_audio_buffer(&bytes, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS))
        {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping audio chunk: {}", e);
                return;
            }
        };
        let was_playing = self.playback.is_playing();
        if self.playback.enqueue(buffer).is_some() && !was_playing {
            debug!("🔊 Agent speaking");
            self.publish(SessionUpdate::AgentSpeaking(true));
        }
    }

    fn run_tool(&mut self, call: &FunctionCall, now: Instant) {
        let dispatched = tools::dispatch(call, &mut self.overlay, now);
        if dispatched.marker.is_some() {
            self.publish(SessionUpdate::Markers(self.overlay.markers()));
        }
        self.send(ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![dispatched.response],
        }));
    }

    fn on_mic_frame(&mut self, samples: &[f32]) {
        if self.status != SessionStatus::Active {
            return;
        }
        if let Some(packet) = self.audio.process(samples) {
            self.send(packet.into_client_message());
        }
    }

    fn on_frame_encoded(&mut self, packet: Option<MediaPacket>) {
        if let Some(packet) = self.frames.finish(packet) {
            if self.status == SessionStatus::Active {
                self.send(packet.into_client_message());
            }
        }
    }

    fn on_track_ended(&mut self, kind: TrackKind) {
        match kind {
            TrackKind::Screen => {
                info!("Screen share ended");
                self.stop();
            }
            TrackKind::Microphone => {
                warn!("Microphone ended; continuing without audio input");
                self.audio.disarm();
                if let Some(mut mic) = self.microphone.take() {
                    mic.stop();
                }
            }
        }
    }

    /// Fire-and-forget send.
    fn send(&mut self, msg: ClientMessage) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let kind = msg.kind();
        if let Err(e) = transport.send(msg) {
            warn!("Dropped outbound {}: {}", kind, e);
        }
    }

    fn fail(&mut self, err: SessionError) {
        let message = err.user_message();
        error!("❌ Cannot start session: {}", message);
        self.teardown();
        self.error = Some(message.clone());
        self.set_status(SessionStatus::Idle, Some(message));
    }

    /// Release everything this session holds. Safe to call repeatedly.
    fn teardown(&mut self) {
        self.epoch += 1;
        self.audio.disarm();
        self.frames.disarm();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if let Some(mut mic) = self.microphone.take() {
            mic.stop();
        }
        if let Some(screen) = self.screen.take() {
            stop_screen(screen);
        }
        let was_playing = self.playback.is_playing();
        self.playback.shutdown();
        if was_playing {
            self.publish(SessionUpdate::AgentSpeaking(false));
        }
    }

    fn set_status(&mut self, status: SessionStatus, error: Option<String>) {
        self.status = status;
        self.publish(SessionUpdate::Status { status, error });
    }

    fn publish(&mut self, update: SessionUpdate) {
        self.updates.push(update);
    }
}

fn stop_screen(screen: SharedScreen) {
    match screen.try_lock() {
        Ok(mut track) => track.stop(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().stop(),
        // a grab is in flight on the blocking pool; stop once it lets go
        Err(TryLockError::WouldBlock) => {
            let screen = screen.clone();
            tokio::task::spawn_blocking(move || {
                if let Ok(mut track) = screen.lock() {
                    track.stop();
                }
            });
        }
    }
}

/// Short description of an event for logs, without sample payloads.
struct EventLabel<'a>(&'a SessionEvent);

impl std::fmt::Debug for EventLabel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            SessionEvent::MicFrame { epoch, samples } => {
                write!(f, "MicFrame(epoch {}, {} samples)", epoch, samples.len())
            }
            SessionEvent::FrameEncoded { epoch, packet } => write!(
                f,
                "FrameEncoded(epoch {}, {} bytes)",
                epoch,
                packet.as_ref().map_or(0, |p| p.bytes().len())
            ),
            SessionEvent::Transport { epoch, event } => {
                write!(f, "Transport(epoch {}, {})", epoch, match event {
                    TransportEvent::Open => "open",
                    TransportEvent::Message(_) => "message",
                    TransportEvent::Error(_) => "error",
                    TransportEvent::Closed => "closed",
                })
            }
            other => write!(f, "{:?}", other),
        }
    }
}
