//! Session runner - drives a [`Session`] from a single tokio task
//!
//! Every input to the session (user commands, transport reports, microphone
//! frames, playback completions) arrives on one channel, and the frame timer
//! and marker expiry are selected in the same loop, so the session itself is
//! never touched concurrently.

use crate::devices::MediaDevices;
use crate::gemini::LiveConfig;
use crate::gemini_client::Connector;
use crate::media_event::{SessionEvent, SessionUpdate};
use crate::session::Session;
use crate::video_capture::FRAME_INTERVAL;
use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

const UPDATE_CAPACITY: usize = 256;

/// Cloneable front end to a running session loop.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    pub fn start(&self) -> Result<()> {
        self.send(SessionEvent::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(SessionEvent::Stop)
    }

    /// Stop the session and end the loop.
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionEvent::Shutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow!("session loop has exited"))
    }
}

/// Spawn the session loop.
pub fn spawn(
    config: LiveConfig,
    connector: Box<dyn Connector>,
    devices: Box<dyn MediaDevices>,
) -> (SessionHandle, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (updates_tx, _) = broadcast::channel(UPDATE_CAPACITY);
    let session = Session::new(config, connector, devices, events_tx.clone());

    let handle = SessionHandle {
        events: events_tx,
        updates: updates_tx.clone(),
    };
    let task = tokio::spawn(run(session, events_rx, updates_tx));
    (handle, task)
}

async fn run(
    mut session: Session,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    updates: broadcast::Sender<SessionUpdate>,
) {
    let mut frame_timer = interval(FRAME_INTERVAL);
    frame_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Session loop started");
    loop {
        let marker_deadline = session.next_marker_deadline();

        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Shutdown) | None => {
                    session.stop();
                    publish(&mut session, &updates);
                    break;
                }
                Some(event) => session.on_event(event, Instant::now()),
            },
            _ = frame_timer.tick() => session.on_frame_tick(),
            _ = async { sleep_until(marker_deadline.unwrap_or_else(Instant::now)).await },
                if marker_deadline.is_some() => {
                session.sweep_markers(Instant::now());
            }
        }

        publish(&mut session, &updates);
    }
    info!("Session loop finished");
}

fn publish(session: &mut Session, updates: &broadcast::Sender<SessionUpdate>) {
    for update in session.drain_updates() {
        debug!("Update: {:?}", update);
        // No subscribers is fine.
        let _ = updates.send(update);
    }
}
