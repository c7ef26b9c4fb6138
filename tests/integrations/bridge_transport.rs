//! Drives `BridgeTransport` against an in-process WebSocket server playing the bridge.

use alertrelay::core::{
    Credentials, DisconnectReason, Recipient, SessionTransport, TransportError, TransportEvent,
};
use alertrelay::transport::BridgeTransport;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(2);

/// Commands a test sends to the fake bridge.
enum BridgeCommand {
    Send(Value),
    Close,
}

struct FakeBridge {
    url: String,
    /// Frames received from the client.
    received: mpsc::UnboundedReceiver<Value>,
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl FakeBridge {
    /// Accepts a single connection. When `auto_ack` is set, every `send`
    /// frame is acknowledged, failing recipients that contain "invalid".
    async fn start(auto_ack: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (received_tx, received) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(BridgeCommand::Send(frame)) => {
                            ws.send(Message::text(frame.to_string())).await.unwrap();
                        }
                        Some(BridgeCommand::Close) | None => {
                            let _ = ws.close(None).await;
                            break;
                        }
                    },
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                            if auto_ack && frame["type"] == "send" {
                                let error = frame["to"]
                                    .as_str()
                                    .filter(|to| to.contains("invalid"))
                                    .map(|_| "recipient not on network");
                                let ack = json!({ "type": "ack", "id": frame["id"], "error": error });
                                ws.send(Message::text(ack.to_string())).await.unwrap();
                            }
                            let _ = received_tx.send(frame);
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                }
            }
        });

        Self {
            url,
            received,
            commands,
        }
    }

    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("bridge stopped")
    }

    fn push(&self, frame: Value) {
        let _ = self.commands.send(BridgeCommand::Send(frame));
    }

    fn close(&self) {
        let _ = self.commands.send(BridgeCommand::Close);
    }
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a transport event")
        .expect("event stream ended")
}

#[tokio::test]
async fn handshake_carries_session_and_credentials() {
    let mut bridge = FakeBridge::start(false).await;
    let transport = BridgeTransport::new(bridge.url.clone());

    let _session = transport
        .connect("default", Some(Credentials::new(br#"{"k":1}"#.to_vec())))
        .await
        .unwrap();

    assert_eq!(
        bridge.next_frame().await,
        json!({ "type": "connect", "session": "default", "credentials": "{\"k\":1}" })
    );
}

#[tokio::test]
async fn bridge_frames_become_session_events() {
    let mut bridge = FakeBridge::start(false).await;
    let transport = BridgeTransport::new(bridge.url.clone());
    let mut session = transport.connect("default", None).await.unwrap();
    assert_eq!(bridge.next_frame().await["credentials"], Value::Null);

    bridge.push(json!({ "type": "pairing", "code": "2@abc" }));
    bridge.push(json!({ "type": "credentials", "data": "{\"me\":\"1\"}" }));
    bridge.push(json!({ "type": "open" }));
    bridge.push(json!({ "type": "close", "status": 401, "reason": "logged out" }));

    assert_eq!(
        next_event(&mut session.events).await,
        TransportEvent::PairingChallenge("2@abc".to_string())
    );
    assert_eq!(
        next_event(&mut session.events).await,
        TransportEvent::CredentialsUpdated(Credentials::new(br#"{"me":"1"}"#.to_vec()))
    );
    assert_eq!(next_event(&mut session.events).await, TransportEvent::Open);
    assert_eq!(
        next_event(&mut session.events).await,
        TransportEvent::Closed(DisconnectReason::LoggedOut)
    );
}

#[tokio::test]
async fn sends_resolve_from_acks() {
    let mut bridge = FakeBridge::start(true).await;
    let transport = BridgeTransport::new(bridge.url.clone());
    let session = transport.connect("default", None).await.unwrap();
    bridge.next_frame().await;

    let good = Recipient::parse("15551234567@s.whatsapp.net").unwrap();
    let bad = Recipient::parse("invalid@s.whatsapp.net").unwrap();

    session.sender.send_text(&good, "help").await.unwrap();
    let frame = bridge.next_frame().await;
    assert_eq!(frame["type"], "send");
    assert_eq!(frame["to"], "15551234567@s.whatsapp.net");
    assert_eq!(frame["text"], "help");

    let err = session.sender.send_text(&bad, "help").await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Rejected("recipient not on network".to_string())
    );
}

#[tokio::test]
async fn socket_close_fails_pending_sends_and_reports_lost_connection() {
    let mut bridge = FakeBridge::start(false).await;
    let transport = BridgeTransport::new(bridge.url.clone());
    let mut session = transport.connect("default", None).await.unwrap();
    bridge.next_frame().await;

    let sender = session.sender.clone();
    let pending = tokio::spawn(async move {
        let recipient = Recipient::parse("15551234567@s.whatsapp.net").unwrap();
        sender.send_text(&recipient, "never acked").await
    });
    bridge.next_frame().await;
    bridge.close();

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(result, Err(TransportError::Closed));

    match next_event(&mut session.events).await {
        TransportEvent::Closed(reason) => assert!(!reason.is_logout(), "{reason}"),
        other => panic!("expected a close event, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_bridge_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let transport = BridgeTransport::new(url);
    let err = transport.connect("default", None).await.err().unwrap();
    assert!(matches!(err, TransportError::Connect(_)), "{err}");
}
