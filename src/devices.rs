//! Media acquisition boundary.
//!
//! A session needs three devices: a microphone, a screen source and an audio
//! output. [`MediaDevices`] opens all three for one session; each opened
//! device reports back into the session loop tagged with that session's
//! epoch.

use crate::error::{Result, SessionError};
use crate::media_event::SessionEvent;
use crate::playback::{AudioOutput, SilentOutput};
use image::RgbaImage;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

pub type EventSink = UnboundedSender<SessionEvent>;

/// A running microphone. Frames arrive as [`SessionEvent::MicFrame`].
pub trait CaptureTrack: Send {
    /// Stop producing frames. Idempotent.
    fn stop(&mut self);
}

/// A running screen source polled by the frame timer.
pub trait ScreenTrack: Send {
    /// Latest frame, or `None` if nothing is available yet.
    fn current_frame(&mut self) -> Option<RgbaImage>;

    /// Idempotent.
    fn stop(&mut self);
}

pub trait MediaDevices: Send {
    fn open_microphone(&mut self, epoch: u64, events: EventSink) -> Result<Box<dyn CaptureTrack>>;

    fn open_screen(&mut self, epoch: u64, events: EventSink) -> Result<Box<dyn ScreenTrack>>;

    fn open_output(&mut self, epoch: u64, events: EventSink) -> Result<Box<dyn AudioOutput>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicrophoneChoice {
    /// Default PulseAudio source
    Pulse,
    /// Replay a 16 kHz mono WAV file in real time
    Wav(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenChoice {
    /// Primary monitor
    Monitor,
    /// A fixed image standing in for the screen
    Image(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChoice {
    Pulse,
    Silent,
}

/// The stock device set, picked per kind from the enabled backends.
#[derive(Debug, Clone)]
pub struct DeviceSet {
    pub microphone: MicrophoneChoice,
    pub screen: ScreenChoice,
    pub output: OutputChoice,
}

impl DeviceSet {
    /// `LIVELENS_MIC_WAV` and `LIVELENS_SCREEN_IMAGE` override the live
    /// devices; without the `pulse` feature output is silent.
    pub fn from_env() -> Self {
        let microphone = match std::env::var("LIVELENS_MIC_WAV") {
            Ok(path) if !path.is_empty() => MicrophoneChoice::Wav(path.into()),
            _ => MicrophoneChoice::Pulse,
        };
        let screen = match std::env::var("LIVELENS_SCREEN_IMAGE") {
            Ok(path) if !path.is_empty() => ScreenChoice::Image(path.into()),
            _ => ScreenChoice::Monitor,
        };
        let output = if cfg!(feature = "pulse") {
            OutputChoice::Pulse
        } else {
            OutputChoice::Silent
        };
        let set = Self {
            microphone,
            screen,
            output,
        };
        info!("Devices: {:?}", set);
        set
    }
}

impl MediaDevices for DeviceSet {
    fn open_microphone(&mut self, epoch: u64, events: EventSink) -> Result<Box<dyn CaptureTrack>> {
        match &self.microphone {
            MicrophoneChoice::Wav(path) => Ok(Box::new(crate::audio::WavMicrophone::open(
                path, epoch, events,
            )?)),
            #[cfg(feature = "pulse")]
            MicrophoneChoice::Pulse => Ok(Box::new(crate::audio::PulseMicrophone::open(
                epoch, events,
            )?)),
            #[cfg(not(feature = "pulse"))]
            MicrophoneChoice::Pulse => Err(SessionError::media(
                "built without the `pulse` feature; set LIVELENS_MIC_WAV",
            )),
        }
    }

    fn open_screen(&mut self, epoch: u64, events: EventSink) -> Result<Box<dyn ScreenTrack>> {
        match &self.screen {
            // a still image never ends on its own
            ScreenChoice::Image(path) => Ok(Box::new(crate::screen::StillImageScreen::open(path)?)),
            #[cfg(feature = "capture")]
            ScreenChoice::Monitor => Ok(Box::new(crate::screen::MonitorScreen::primary(
                epoch, events,
            )?)),
            #[cfg(not(feature = "capture"))]
            ScreenChoice::Monitor => {
                let _ = (epoch, events);
                Err(SessionError::media(
                    "built without the `capture` feature; set LIVELENS_SCREEN_IMAGE",
                ))
            }
        }
    }

    fn open_output(&mut self, epoch: u64, events: EventSink) -> Result<Box<dyn AudioOutput>> {
        match self.output {
            #[cfg(feature = "pulse")]
            OutputChoice::Pulse => Ok(Box::new(crate::audio::PulseOutput::open(epoch, events)?)),
            #[cfg(not(feature = "pulse"))]
            OutputChoice::Pulse => Err(SessionError::media(
                "built without the `pulse` feature",
            )),
            OutputChoice::Silent => Ok(Box::new(SilentOutput::new(epoch, events))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn missing_wav_is_acquisition_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut set = DeviceSet {
            microphone: MicrophoneChoice::Wav("/nonexistent/mic.wav".into()),
            screen: ScreenChoice::Image("/nonexistent/screen.png".into()),
            output: OutputChoice::Silent,
        };
        assert!(matches!(
            set.open_microphone(1, tx.clone()),
            Err(SessionError::MediaAcquisitionFailed(_))
        ));
        assert!(matches!(
            set.open_screen(1, tx.clone()),
            Err(SessionError::MediaAcquisitionFailed(_))
        ));
        assert!(set.open_output(1, tx).is_ok());
    }
}
