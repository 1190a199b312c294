//! Screen sources polled by the frame pipeline.

use crate::devices::ScreenTrack;
use crate::error::{Result, SessionError};
use image::RgbaImage;
use std::path::Path;
use tracing::info;
#[cfg(any(feature = "capture", test))]
use {
    crate::devices::EventSink,
    crate::media_event::{SessionEvent, TrackKind},
    tracing::warn,
};

/// Consecutive failed grabs before a live screen is treated as gone.
#[cfg(any(feature = "capture", test))]
const MAX_CAPTURE_FAILURES: u32 = 4;

/// A fixed picture served as every frame.
pub struct StillImageScreen {
    image: RgbaImage,
    stopped: bool,
}

impl StillImageScreen {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            stopped: false,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .map_err(|e| SessionError::media(format!("{}: {}", path.display(), e)))?
            .to_rgba8();
        info!(
            "🖥️  Using {} as screen ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::new(image))
    }
}

impl ScreenTrack for StillImageScreen {
    fn current_frame(&mut self) -> Option<RgbaImage> {
        (!self.stopped).then(|| self.image.clone())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Tracks capture health of a live screen and reports the share as ended,
/// once, when it goes away.
#[cfg(any(feature = "capture", test))]
struct ShareWatch {
    epoch: u64,
    events: EventSink,
    failures: u32,
    ended: bool,
}

#[cfg(any(feature = "capture", test))]
impl ShareWatch {
    fn new(epoch: u64, events: EventSink) -> Self {
        Self {
            epoch,
            events,
            failures: 0,
            ended: false,
        }
    }

    fn captured(&mut self) {
        self.failures = 0;
    }

    /// Record a failed grab. `gone` means the source has disappeared.
    /// Returns true once the share is over.
    fn failed(&mut self, gone: bool) -> bool {
        self.failures += 1;
        if !self.ended && (gone || self.failures >= MAX_CAPTURE_FAILURES) {
            self.ended = true;
            warn!("🖥️  Screen share lost after {} failed grabs", self.failures);
            let _ = self.events.send(SessionEvent::TrackEnded {
                epoch: self.epoch,
                kind: TrackKind::Screen,
            });
        }
        self.ended
    }
}

#[cfg(feature = "capture")]
pub use monitor::MonitorScreen;

#[cfg(feature = "capture")]
mod monitor {
    use super::*;
    use tracing::debug;
    use xcap::Monitor;

    /// The primary monitor, captured on demand.
    ///
    /// Reports [`TrackKind::Screen`] as ended when the monitor is unplugged
    /// or capture keeps failing.
    pub struct MonitorScreen {
        monitor: Option<Monitor>,
        watch: ShareWatch,
    }

    impl MonitorScreen {
        pub fn primary(epoch: u64, events: EventSink) -> Result<Self> {
            let monitors = Monitor::all().map_err(|e| SessionError::media(e.to_string()))?;
            let monitor = monitors
                .iter()
                .find(|m| m.is_primary().unwrap_or(false))
                .or_else(|| monitors.first())
                .cloned()
                .ok_or_else(|| SessionError::media("no monitors found"))?;

            info!(
                "🖥️  Using monitor: {} ({}x{})",
                monitor.name().unwrap_or_else(|_| "Unknown".to_string()),
                monitor.width().unwrap_or(0),
                monitor.height().unwrap_or(0)
            );
            Ok(Self {
                monitor: Some(monitor),
                watch: ShareWatch::new(epoch, events),
            })
        }

        fn still_attached(monitor: &Monitor) -> bool {
            let Ok(id) = monitor.id() else {
                return false;
            };
            Monitor::all()
                .map(|all| all.iter().any(|m| m.id().ok() == Some(id)))
                .unwrap_or(false)
        }
    }

    impl ScreenTrack for MonitorScreen {
        fn current_frame(&mut self) -> Option<RgbaImage> {
            let monitor = self.monitor.as_ref()?;
            match monitor.capture_image() {
                Ok(image) => {
                    self.watch.captured();
                    Some(image)
                }
                Err(e) => {
                    warn!("Screen capture failed: {}", e);
                    let gone = !Self::still_attached(monitor);
                    if self.watch.failed(gone) {
                        self.monitor = None;
                    }
                    None
                }
            }
        }

        fn stop(&mut self) {
            if self.monitor.take().is_some() {
                debug!("Monitor capture stopped");
            }
        }
    }
}
