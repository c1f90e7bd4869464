//! WebSocket signaling client

use super::protocol::{InboundSignal, OutboundSignal};
use super::SignalingSink;
use crate::session::SessionEvent;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket connection to the signaling relay
///
/// Inbound frames are parsed and pushed onto the session event queue;
/// outbound signals are serialized and written by a background task.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    /// Signaling server URL
    url: String,

    /// Outgoing message sender
    tx: mpsc::UnboundedSender<Message>,
}

impl SignalingClient {
    /// Connect to the relay and start the sender and receiver tasks
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket signaling server URL (ws:// or wss://)
    /// * `events` - Session event queue receiving inbound signals
    pub async fn connect(url: &str, events: mpsc::UnboundedSender<SessionEvent>) -> Result<Self> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect to {}: {}", url, e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, events));

        Ok(Self {
            url: url.to_string(),
            tx,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }

        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    /// Receiver task: parses relay frames onto the session queue
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            let event = match msg_result {
                Ok(Message::Text(text)) => {
                    trace!("Received signaling message: {}", text);
                    match InboundSignal::from_json(&text) {
                        Ok(signal) => SessionEvent::Signal(signal),
                        Err(e) => {
                            warn!("Failed to handle signaling message: {}", e);
                            SessionEvent::SignalingError(e.to_string())
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    let _ = events.send(SessionEvent::SignalingError(
                        "relay closed the connection".to_string(),
                    ));
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    let _ = events.send(SessionEvent::SignalingError(format!(
                        "relay connection lost: {}",
                        e
                    )));
                    break;
                }
                _ => continue,
            };

            if events.send(event).is_err() {
                debug!("Session gone, stopping signaling receiver");
                break;
            }
        }

        debug!("Receiver task terminated");
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, signal: OutboundSignal) -> Result<()> {
        let text = signal.to_json()?;
        trace!("Sending signaling message: {}", text);
        self.tx
            .send(Message::Text(text))
            .map_err(|e| Error::SignalingError(format!("Relay connection closed: {}", e)))
    }
}
