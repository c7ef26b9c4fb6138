//! WebSocket client for an external messaging bridge.
//!
//! The bridge owns the actual messaging-network protocol. This side speaks a
//! small JSON frame protocol over one WebSocket per session:
//!
//! * client → bridge: `connect` (once, right after the handshake) and `send`
//! * bridge → client: `open`, `close`, `pairing`, `credentials` and `ack`
//!
//! Every `send` carries an id that the bridge echoes back in its `ack`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::core::{
    Credentials, DisconnectReason, MessageSender, Recipient, Session, SessionTransport,
    TransportError, TransportEvent,
};

type BridgeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckSender = oneshot::Sender<Result<(), TransportError>>;

/// Sends awaiting an ack. `None` once the socket is gone.
type PendingAcks = Arc<Mutex<Option<HashMap<u64, AckSender>>>>;

const EVENT_BUFFER: usize = 64;

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Connect {
        session: &'a str,
        credentials: Option<String>,
    },
    Send {
        id: u64,
        to: &'a str,
        text: &'a str,
    },
}

impl ClientFrame<'_> {
    fn to_message(&self) -> Result<Message, TransportError> {
        serde_json::to_string(self)
            .map(Message::text)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BridgeFrame {
    Open,
    Close {
        status: Option<u16>,
        reason: Option<String>,
    },
    Pairing {
        code: String,
    },
    Credentials {
        data: String,
    },
    Ack {
        id: u64,
        error: Option<String>,
    },
}

/// Opens sessions through a messaging bridge at a fixed WebSocket URL.
#[derive(Debug, Clone)]
pub struct BridgeTransport {
    url: String,
}

impl BridgeTransport {
    /// # Arguments
    /// * `url` - The bridge endpoint (e.g., "ws://127.0.0.1:8085/session")
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionTransport for BridgeTransport {
    async fn connect(
        &self,
        session_id: &str,
        credentials: Option<Credentials>,
    ) -> Result<Session, TransportError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", self.url, e)))?;
        info!(url = %self.url, "Connected to messaging bridge");

        let (mut write, read) = ws_stream.split();

        let hello = ClientFrame::Connect {
            session: session_id,
            credentials: credentials.map(|c| String::from_utf8_lossy(c.as_bytes()).into_owned()),
        };
        write
            .send(hello.to_message()?)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: PendingAcks = Arc::new(Mutex::new(Some(HashMap::new())));
        tokio::spawn(read_frames(read, event_tx, pending.clone()));

        Ok(Session {
            events: event_rx,
            sender: Arc::new(BridgeSender {
                sink: tokio::sync::Mutex::new(write),
                pending,
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

/// Reads bridge frames until the socket closes, turning them into session
/// events and resolving acks.
async fn read_frames(
    mut read: SplitStream<BridgeStream>,
    events: mpsc::Sender<TransportEvent>,
    pending: PendingAcks,
) {
    let mut close_reason = String::from("bridge stream ended");

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<BridgeFrame>(text.as_str()) {
                Ok(BridgeFrame::Ack { id, error }) => resolve_ack(&pending, id, error),
                Ok(BridgeFrame::Close { status, reason }) => {
                    let reason = DisconnectReason::from_status(
                        status,
                        reason.unwrap_or_else(|| "closed by bridge".to_string()),
                    );
                    let _ = events.send(TransportEvent::Closed(reason)).await;
                    fail_pending(&pending);
                    return;
                }
                Ok(frame) => {
                    if let Some(event) = into_event(frame) {
                        if events.send(event).await.is_err() {
                            debug!("Session receiver dropped; stopping bridge reader");
                            fail_pending(&pending);
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed bridge frame"),
            },
            Ok(Message::Close(frame)) => {
                close_reason = frame
                    .map(|f| format!("websocket closed ({}): {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "websocket closed".to_string());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                close_reason = format!("websocket error: {}", e);
                break;
            }
        }
    }

    fail_pending(&pending);
    let _ = events
        .send(TransportEvent::Closed(DisconnectReason::ConnectionLost {
            status: None,
            reason: close_reason,
        }))
        .await;
}

fn into_event(frame: BridgeFrame) -> Option<TransportEvent> {
    match frame {
        BridgeFrame::Open => Some(TransportEvent::Open),
        BridgeFrame::Pairing { code } => Some(TransportEvent::PairingChallenge(code)),
        BridgeFrame::Credentials { data } => {
            Some(TransportEvent::CredentialsUpdated(Credentials::new(data.into_bytes())))
        }
        BridgeFrame::Close { status, reason } => Some(TransportEvent::Closed(
            DisconnectReason::from_status(status, reason.unwrap_or_default()),
        )),
        BridgeFrame::Ack { .. } => None,
    }
}

fn resolve_ack(pending: &PendingAcks, id: u64, error: Option<String>) {
    let waiter = pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_mut()
        .and_then(|acks| acks.remove(&id));
    match waiter {
        Some(tx) => {
            let _ = tx.send(error.map_or(Ok(()), |e| Err(TransportError::Rejected(e))));
        }
        None => debug!(id, "Ack for unknown send id"),
    }
}

fn fail_pending(pending: &PendingAcks) {
    let acks = pending.lock().unwrap_or_else(|e| e.into_inner()).take();
    for (_, tx) in acks.into_iter().flatten() {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

struct BridgeSender {
    sink: tokio::sync::Mutex<SplitSink<BridgeStream, Message>>,
    pending: PendingAcks,
    next_id: AtomicU64,
}

impl BridgeSender {
    fn forget(&self, id: u64) {
        if let Some(acks) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            acks.remove(&id);
        }
    }
}

#[async_trait]
impl MessageSender for BridgeSender {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<(), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = ClientFrame::Send {
            id,
            to: recipient.as_str(),
            text,
        }
        .to_message()?;

        let (tx, rx) = oneshot::channel();
        match self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            Some(acks) => {
                acks.insert(id, tx);
            }
            None => return Err(TransportError::Closed),
        }

        if let Err(e) = self.sink.lock().await.send(frame).await {
            self.forget(id);
            debug!(id, error = %e, "Bridge send failed");
            return Err(TransportError::Closed);
        }

        rx.await.unwrap_or(Err(TransportError::Closed))
    }
}
