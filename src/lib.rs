//! LiveLens - talk to a Gemini Live agent while it watches your screen
//!
//! Microphone audio and periodic screen frames stream to the agent over one
//! WebSocket; the agent answers with speech that is scheduled for gapless
//! playback, transcripts of both sides, and `click_answer` tool calls that
//! place short-lived markers on an annotation overlay.

#![forbid(unsafe_code)]

/// Microphone and speaker devices
pub mod audio;
/// Microphone frames to outbound PCM packets
pub mod audio_capture;
/// Device acquisition boundary
pub mod devices;
pub mod error;
/// Live API configuration and wire types
pub mod gemini;
/// WebSocket transport
pub mod gemini_client;
pub mod media_event;
pub mod overlay;
/// PCM16 codec
pub mod pcm;
/// Gapless playback scheduling
pub mod playback;
pub mod router;
/// Screen sources
pub mod screen;
pub mod session;
pub mod session_runner;
pub mod tools;
pub mod transcript;
/// Screen frames to outbound JPEG packets
pub mod video_capture;

pub use error::{Result, SessionError};
pub use gemini::LiveConfig;
pub use media_event::{SessionStatus, SessionUpdate};
pub use session_runner::{spawn, SessionHandle};
