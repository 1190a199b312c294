//! LiveLens command line front end
//!
//! Starts a session with the devices picked from the environment, prints the
//! transcript and marker changes as they happen, and stops on Ctrl-C.

#![forbid(unsafe_code)]

use anyhow::Result;
use livelens::devices::DeviceSet;
use livelens::gemini_client::GeminiConnector;
use livelens::transcript::Sender;
use livelens::{LiveConfig, SessionStatus, SessionUpdate};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livelens=info")),
        )
        .init();

    info!("🚀 Starting LiveLens");
    let config = LiveConfig::from_env();
    let devices = DeviceSet::from_env();
    let (handle, task) = livelens::spawn(config, Box::new(GeminiConnector), Box::new(devices));
    let mut updates = handle.subscribe();
    handle.start()?;

    let mut was_live = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
            update = updates.recv() => match update {
                Ok(SessionUpdate::Status { status, error }) => {
                    info!("Status: {:?}", status);
                    let failed = error.is_some();
                    if let Some(message) = error {
                        error!("{}", message);
                    }
                    match status {
                        SessionStatus::Connecting | SessionStatus::Active => was_live = true,
                        SessionStatus::Idle if was_live || failed => break,
                        SessionStatus::Idle | SessionStatus::Error => {}
                    }
                }
                Ok(SessionUpdate::Transcript(entries)) => {
                    // each update appends exactly one entry
                    if let Some(entry) = entries.last() {
                        let who = match entry.sender {
                            Sender::User => "you",
                            Sender::Model => "agent",
                        };
                        println!("[{}] {}", who, entry.text);
                    }
                }
                Ok(SessionUpdate::AgentSpeaking(speaking)) => {
                    info!("{}", if speaking { "🔊 Agent speaking" } else { "🔇 Agent idle" });
                }
                Ok(SessionUpdate::Markers(markers)) => {
                    for m in &markers {
                        println!("📍 #{} ({:.1}%, {:.1}%) {}", m.id, m.x, m.y, m.label);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Skipped {} updates", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown()?;
    task.await?;
    info!("Bye");
    Ok(())
}
