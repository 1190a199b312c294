//! Event vocabulary shared by the capture tasks, the transport and the
//! session loop.

use crate::gemini::{Blob, ClientMessage, RealtimeInput, ServerMessage};
use crate::overlay::AnnotationMarker;
use crate::pcm;
use crate::transcript::TranscriptEntry;

pub const AUDIO_MIME: &str = "audio/pcm;rate=16000";
pub const FRAME_MIME: &str = "image/jpeg";

/// Outbound media, fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaPacket {
    /// PCM16 microphone frame
    Audio(Vec<u8>),
    /// JPEG screen frame
    Frame(Vec<u8>),
}

impl MediaPacket {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Audio(_) => AUDIO_MIME,
            Self::Frame(_) => FRAME_MIME,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Audio(b) | Self::Frame(b) => b,
        }
    }

    /// `{data: <base64>, mimeType}` as carried in the `media` slot.
    pub fn to_blob(&self) -> Blob {
        Blob {
            mime_type: self.mime_type().to_string(),
            data: pcm::encode_base64(self.bytes()),
        }
    }

    pub fn into_client_message(self) -> ClientMessage {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![self.to_blob()],
        })
    }
}

/// What the transport reports back to the session loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Channel open and setup acknowledged
    Open,
    Message(Box<ServerMessage>),
    Error(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Microphone,
    Screen,
}

/// Everything that enters the single-threaded session loop.
///
/// Events produced by a session's collaborators carry that session's epoch so
/// that late completions from a torn-down session are recognised and dropped.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start,
    Stop,
    /// Tear down and leave the loop
    Shutdown,
    Transport { epoch: u64, event: TransportEvent },
    /// 4096 microphone samples at 16 kHz
    MicFrame { epoch: u64, samples: Vec<f32> },
    /// Result of one frame tick; `None` when there was nothing to send
    FrameEncoded {
        epoch: u64,
        packet: Option<MediaPacket>,
    },
    /// A capture track was stopped outside our control
    TrackEnded { epoch: u64, kind: TrackKind },
    /// A playback slot finished on its own
    PlaybackEnded { epoch: u64, slot: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Error,
}

/// Observable changes published to the UI side.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Status {
        status: SessionStatus,
        error: Option<String>,
    },
    Transcript(Vec<TranscriptEntry>),
    AgentSpeaking(bool),
    Markers(Vec<AnnotationMarker>),
}
