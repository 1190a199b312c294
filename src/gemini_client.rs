//! Live WebSocket transport.
//!
//! One background task owns the socket. It sends `setup` first, waits for
//! `setupComplete`, and then multiplexes outbound messages from a channel with
//! inbound frames from the server. Because every write goes through that one
//! task, outbound messages are serialized in the order they were queued.
//!
//! All reports flow back into the session loop as
//! [`SessionEvent::Transport`] tagged with the connection's epoch.

use crate::devices::EventSink;
use crate::error::{Result, SessionError};
use crate::gemini::{ClientMessage, LiveConfig, ServerMessage};
use crate::media_event::{SessionEvent, TransportEvent};
use crate::tools;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

/// An open (or opening) bidirectional channel to the agent.
pub trait Transport: Send {
    /// Queue a message. Fails only if the channel is already gone.
    fn send(&mut self, msg: ClientMessage) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// Opens transports. The returned transport reports `Open` once the server
/// acknowledged setup.
pub trait Connector: Send {
    fn connect(
        &mut self,
        config: &LiveConfig,
        api_key: &str,
        epoch: u64,
        events: EventSink,
    ) -> Result<Box<dyn Transport>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiConnector;

impl Connector for GeminiConnector {
    fn connect(
        &mut self,
        config: &LiveConfig,
        api_key: &str,
        epoch: u64,
        events: EventSink,
    ) -> Result<Box<dyn Transport>> {
        let url = config.endpoint(api_key);
        let setup = config.setup_message(tools::declarations());
        let timeout = config.setup_timeout;
        let (tx, rx) = mpsc::unbounded_channel();

        info!("Connecting to {} (model {})", config.url, config.model);
        tokio::spawn(async move {
            let link = Link { epoch, events };
            match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
                Ok(Ok((ws, resp))) => {
                    debug!("WebSocket handshake response: {:?}", resp.status());
                    run_connection(ws, setup, timeout, rx, &link).await;
                }
                Ok(Err(e)) => {
                    error!("WebSocket connect failed: {}", e);
                    link.report(TransportEvent::Error(e.to_string()));
                }
                Err(_) => {
                    error!("WebSocket connect timed out");
                    link.report(TransportEvent::Error("connect timed out".into()));
                }
            }
        });

        Ok(Box::new(GeminiTransport { outbound: Some(tx) }))
    }
}

/// Handle to a running connection task.
pub struct GeminiTransport {
    outbound: Option<UnboundedSender<ClientMessage>>,
}

impl Transport for GeminiTransport {
    fn send(&mut self, msg: ClientMessage) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| SessionError::send("transport closed"))?;
        outbound
            .send(msg)
            .map_err(|e| SessionError::send(format!("{} dropped, connection task gone", e.0.kind())))
    }

    fn close(&mut self) {
        // Dropping the sender tells the task to send a close frame and exit.
        if self.outbound.take().is_some() {
            debug!("Transport close requested");
        }
    }
}

impl Drop for GeminiTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct Link {
    epoch: u64,
    events: EventSink,
}

impl Link {
    fn report(&self, event: TransportEvent) {
        let _ = self.events.send(SessionEvent::Transport {
            epoch: self.epoch,
            event,
        });
    }
}

async fn send_json<S>(sink: &mut S, msg: &ClientMessage) -> std::result::Result<(), String>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::text(json)).await.map_err(|e| e.to_string())
}

/// Drive one connection until either side closes it.
async fn run_connection<W>(
    ws: W,
    setup: ClientMessage,
    setup_timeout: Duration,
    mut outbound: UnboundedReceiver<ClientMessage>,
    link: &Link,
) where
    W: Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    if let Err(e) = send_json(&mut sink, &setup).await {
        error!("Failed to send setup: {}", e);
        link.report(TransportEvent::Error(e));
        return;
    }
    debug!("Setup sent, waiting for acknowledgment");

    let setup_deadline = tokio::time::sleep(setup_timeout);
    tokio::pin!(setup_deadline);
    let mut open = false;

    loop {
        tokio::select! {
            _ = &mut setup_deadline, if !open => {
                error!("No setupComplete within {:?}", setup_timeout);
                link.report(TransportEvent::Error("timed out waiting for setup".into()));
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = send_json(&mut sink, &msg).await {
                        // The reader side reports the failure if the socket is gone.
                        warn!("Failed to send {}: {}", msg.kind(), e);
                    }
                }
                None => {
                    debug!("Outbound channel closed, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), &mut open, link);
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => handle_text(text, &mut open, link),
                    Err(_) => debug!("Ignoring {} byte binary frame", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    link.report(TransportEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    link.report(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    info!("WebSocket stream ended");
                    link.report(TransportEvent::Closed);
                    break;
                }
            },
        }
    }
    debug!("Connection task for epoch {} finished", link.epoch);
}

fn handle_text(text: &str, open: &mut bool, link: &Link) {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Unparseable server message: {} ({} bytes)", e, text.len());
            return;
        }
    };

    if msg.setup_complete.is_some() {
        if !*open {
            *open = true;
            info!("✅ Setup complete");
            link.report(TransportEvent::Open);
        }
        return;
    }

    if let Some(go_away) = &msg.go_away {
        warn!("Server is going away (time left: {:?})", go_away.time_left);
        return;
    }

    link.report(TransportEvent::Message(Box::new(msg)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{FunctionResponse, ToolResponse};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn next_transport_event(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> (u64, TransportEvent) {
        match rx.recv().await.unwrap() {
            SessionEvent::Transport { epoch, event } => (epoch, event),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    fn local_config(addr: std::net::SocketAddr) -> LiveConfig {
        LiveConfig {
            url: format!("ws://{}/live", addr),
            setup_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn handshake_then_bidirectional_traffic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let setup: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
                other => panic!("Expected setup text, got {:?}", other),
            };
            assert!(setup["setup"]["tools"][0]["functionDeclarations"].is_array());

            ws.send(Message::text(json!({"setupComplete": {}}).to_string()))
                .await
                .unwrap();
            ws.send(Message::text(
                json!({"toolCall": {"functionCalls": [
                    {"id": "abc", "name": "click_answer", "args": {"x": 42, "y": 17, "label": "Submit"}}
                ]}})
                .to_string(),
            ))
            .await
            .unwrap();

            let reply: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
                other => panic!("Expected tool response, got {:?}", other),
            };
            // wait for the client close frame
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
            reply
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = GeminiConnector
            .connect(&local_config(addr), "test-key", 9, tx)
            .unwrap();

        assert!(matches!(next_transport_event(&mut rx).await, (9, TransportEvent::Open)));
        match next_transport_event(&mut rx).await {
            (9, TransportEvent::Message(msg)) => {
                assert_eq!(msg.tool_call.unwrap().function_calls[0].id, "abc");
            }
            other => panic!("Unexpected: {:?}", other),
        }

        transport
            .send(ClientMessage::ToolResponse(ToolResponse {
                function_responses: vec![FunctionResponse {
                    id: "abc".into(),
                    name: "click_answer".into(),
                    response: json!({"result": "ok"}),
                }],
            }))
            .unwrap();
        transport.close();
        transport.close();
        assert!(transport.send(ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![],
        }))
        .is_err());

        let reply = server.await.unwrap();
        assert_eq!(
            reply,
            json!({"toolResponse": {"functionResponses": [
                {"id": "abc", "name": "click_answer", "response": {"result": "ok"}}
            ]}})
        );
    }

    #[tokio::test]
    async fn missing_setup_ack_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // swallow everything, never acknowledge
            while ws.next().await.is_some() {}
        });

        let mut config = local_config(addr);
        config.setup_timeout = Duration::from_millis(200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = GeminiConnector.connect(&config, "k", 1, tx).unwrap();

        assert!(matches!(
            next_transport_event(&mut rx).await,
            (1, TransportEvent::Error(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = GeminiConnector
            .connect(&local_config(addr), "k", 4, tx)
            .unwrap();
        assert!(matches!(
            next_transport_event(&mut rx).await,
            (4, TransportEvent::Error(_))
        ));
    }

    #[tokio::test]
    async fn server_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::text(json!({"setupComplete": {}}).to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = GeminiConnector
            .connect(&local_config(addr), "k", 2, tx)
            .unwrap();
        assert!(matches!(next_transport_event(&mut rx).await, (2, TransportEvent::Open)));
        assert!(matches!(next_transport_event(&mut rx).await, (2, TransportEvent::Closed)));
    }
}
