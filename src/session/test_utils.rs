//! In-memory transport and credential store for exercising the session
//! lifecycle without a messaging network.

use crate::core::{
    CredentialStore, Credentials, MessageSender, Recipient, Session, SessionTransport,
    TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeState {
    connects: Vec<Option<Credentials>>,
    event_tx: Option<mpsc::Sender<TransportEvent>>,
    pending_failures: usize,
    failing_recipients: HashSet<String>,
    send_delays: HashMap<String, Duration>,
    sent: Vec<(Recipient, String)>,
}

/// Fake transport. Each `connect` opens a session whose events are driven by
/// the test through [`FakeTransport::emit`].
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    auto_open: bool,
}

impl FakeTransport {
    /// A transport whose sessions report `Open` as soon as they are created.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            auto_open: true,
        }
    }

    /// A transport whose sessions stay silent until the test emits events.
    pub fn manual() -> Self {
        Self {
            auto_open: false,
            ..Self::new()
        }
    }

    /// Makes the next `n` calls to `connect` fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().unwrap().pending_failures = n;
    }

    /// Makes every send to `recipient` fail.
    pub fn fail_recipient(&self, recipient: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_recipients
            .insert(recipient.to_string());
    }

    /// Makes sends to `recipient` take `delay` before completing.
    pub fn delay_recipient(&self, recipient: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .send_delays
            .insert(recipient.to_string(), delay);
    }

    /// Pushes an event into the current session. Returns `false` if there is
    /// no live session to receive it.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let tx = self.state.lock().unwrap().event_tx.clone();
        match tx {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Ends the current session's event stream without a close event.
    pub fn drop_session(&self) {
        self.state.lock().unwrap().event_tx = None;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects.len()
    }

    /// The credentials passed to each `connect` call, in order.
    pub fn connect_credentials(&self) -> Vec<Option<Credentials>> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn sent_messages(&self) -> Vec<(Recipient, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Waits until `connect` has been called at least `n` times.
    pub async fn wait_for_connects(&self, n: usize, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            while self.connect_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {} connects, saw {}", n, self.connect_count()));
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn connect(
        &self,
        _session_id: &str,
        credentials: Option<Credentials>,
    ) -> Result<Session, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connects.push(credentials);
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(TransportError::Connect("simulated connect failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(32);
        if self.auto_open {
            tx.try_send(TransportEvent::Open)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
        }
        state.event_tx = Some(tx);

        Ok(Session {
            events: rx,
            sender: Arc::new(FakeSender {
                state: self.state.clone(),
            }),
        })
    }
}

struct FakeSender {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl MessageSender for FakeSender {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<(), TransportError> {
        let delay = self
            .state
            .lock()
            .unwrap()
            .send_delays
            .get(recipient.as_str())
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_recipients.contains(recipient.as_str()) {
            return Err(TransportError::Rejected(format!(
                "simulated failure for {}",
                recipient
            )));
        }
        state.sent.push((recipient.clone(), text.to_string()));
        Ok(())
    }
}

/// Credential store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Credentials>>,
    saves: Mutex<usize>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    /// Waits until at least one `save` has happened.
    pub async fn wait_for_save(&self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            while self.save_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for a credential save");
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<Credentials>> {
        Ok(self.entries.lock().unwrap().get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, credentials: &Credentials) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(session_id.to_string(), credentials.clone());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<()> {
        self.entries.lock().unwrap().remove(session_id);
        Ok(())
    }
}
