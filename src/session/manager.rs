//! The `ConnectionManager` keeps one authenticated transport session alive.
//!
//! It is the only writer of the connection state. A supervisor task opens a
//! session, feeds its events through the state machine, and on a non-logout
//! close waits a fixed delay and opens a fresh session. A logout halts the
//! supervisor until an operator calls [`ConnectionManager::repair`].

use crate::{
    core::{
        CredentialStore, DisconnectReason, MessageSender, Recipient, Session, SessionTransport,
        TransportEvent,
    },
    internal_metrics::Metrics,
    session::{
        ConnectionError, ConnectionEvent, ConnectionState, InvalidTransition, PairingChallenge,
        ReconnectPolicy,
    },
    task_manager::TaskManager,
};
use arc_swap::ArcSwapOption;
use chrono::{SecondsFormat, Utc};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// The send handle of the currently open session.
struct SessionLink {
    sender: Arc<dyn MessageSender>,
}

/// How a single session ended.
enum SessionEnd {
    Lost,
    LoggedOut,
    Shutdown,
}

/// Owns the session lifecycle and exposes readiness to the rest of the relay.
pub struct ConnectionManager {
    session_id: String,
    transport: Arc<dyn SessionTransport>,
    credentials: Arc<dyn CredentialStore>,
    policy: ReconnectPolicy,
    task_manager: TaskManager,
    metrics: Arc<Metrics>,
    state_tx: watch::Sender<ConnectionState>,
    pairing_tx: watch::Sender<Option<PairingChallenge>>,
    link: ArcSwapOption<SessionLink>,
}

impl ConnectionManager {
    /// Creates a manager in `Disconnected`. Nothing happens until `connect()`.
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn SessionTransport>,
        credentials: Arc<dyn CredentialStore>,
        policy: ReconnectPolicy,
        task_manager: TaskManager,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (pairing_tx, _) = watch::channel(None);
        metrics.set_connection_state(ConnectionState::Disconnected);
        Arc::new(Self {
            session_id: session_id.into(),
            transport,
            credentials,
            policy,
            task_manager,
            metrics,
            state_tx,
            pairing_tx,
            link: ArcSwapOption::empty(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// True iff the session is `Connected`.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The most recent pairing challenge, cleared once a session opens.
    pub fn pairing_challenge(&self) -> Option<PairingChallenge> {
        self.pairing_tx.borrow().clone()
    }

    pub fn subscribe_pairing(&self) -> watch::Receiver<Option<PairingChallenge>> {
        self.pairing_tx.subscribe()
    }

    /// Starts a connection supervisor if the manager is `Disconnected`.
    ///
    /// Safe to call repeatedly: the state check and the move to `Connecting`
    /// happen under the state lock, so at most one supervisor runs. Returns
    /// `true` if this call started one. In `LoggedOut` nothing is started;
    /// use [`repair`](Self::repair).
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.task_manager.is_shutting_down() {
            debug!("Ignoring connect() during shutdown.");
            return false;
        }

        match self.transition(ConnectionEvent::ConnectRequested) {
            Ok(_) => {
                let manager = Arc::clone(self);
                self.task_manager
                    .spawn("ConnectionSupervisor", manager.supervise());
                true
            }
            Err(InvalidTransition {
                from: ConnectionState::LoggedOut,
                ..
            }) => {
                warn!(
                    session_id = %self.session_id,
                    "Session is logged out; re-pair before connecting again."
                );
                false
            }
            Err(e) => {
                debug!(state = %e.from, "connect() ignored; a session attempt is already active.");
                false
            }
        }
    }

    /// Manual re-authentication after a logout.
    ///
    /// Clears the stored credentials and starts a fresh session, which makes
    /// the transport issue a new pairing challenge.
    pub async fn repair(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let state = self.state();
        if !state.is_terminal() {
            return Err(ConnectionError::NotLoggedOut(state));
        }

        self.credentials
            .clear(&self.session_id)
            .await
            .map_err(|e| ConnectionError::CredentialStore(e.to_string()))?;
        self.transition(ConnectionEvent::RepairRequested)
            .map_err(|e| ConnectionError::NotLoggedOut(e.from))?;

        info!(session_id = %self.session_id, "Stored credentials cleared; starting a fresh pairing.");
        self.connect();
        Ok(())
    }

    /// Sends `message` to `recipient` over the live session.
    ///
    /// Readiness is checked at call time; `NotConnected` is returned without
    /// touching the transport when the session is not `Connected`.
    pub async fn send(&self, recipient: &Recipient, message: &str) -> Result<(), ConnectionError> {
        if !self.is_ready() {
            return Err(ConnectionError::NotConnected);
        }
        let link = self.link.load_full().ok_or(ConnectionError::NotConnected)?;
        link.sender.send_text(recipient, message).await?;
        Ok(())
    }

    /// Applies `event` to the state machine and publishes the result.
    fn transition(&self, event: ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        let mut result = Err(InvalidTransition {
            from: self.state(),
            event: event.clone(),
        });
        self.state_tx.send_if_modified(|state| match state.next(&event) {
            Ok(next) => {
                result = Ok((*state, next));
                *state = next;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });

        let (from, to) = result?;
        info!(session_id = %self.session_id, %from, %to, "Connection state changed");
        self.metrics.set_connection_state(to);
        Ok(to)
    }

    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn supervise(self: Arc<Self>) {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        info!("Connection supervisor started.");

        loop {
            // The state is `Connecting` at the top of every iteration.
            let opened = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                result = self.open_session() => result,
            };

            let session = match opened {
                Ok(session) => session,
                Err(e) => {
                    self.metrics.connection_setup_failures_total.increment(1);
                    warn!(
                        error = %e,
                        retry_in = ?self.policy.connect_retry_delay,
                        "Failed to open transport session."
                    );
                    if !sleep_or_shutdown(self.policy.connect_retry_delay, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };

            match self.run_session(session, &mut shutdown_rx).await {
                SessionEnd::Shutdown => break,
                SessionEnd::LoggedOut => {
                    warn!("Session logged out. Automatic reconnection halted until re-pairing.");
                    return;
                }
                SessionEnd::Lost => {
                    self.metrics.reconnects_total.increment(1);
                    info!(delay = ?self.policy.reconnect_delay, "Scheduling reconnect.");
                    if !sleep_or_shutdown(self.policy.reconnect_delay, &mut shutdown_rx).await {
                        break;
                    }
                    if let Err(e) = self.transition(ConnectionEvent::RetryElapsed) {
                        error!(error = %e, "Reconnect aborted.");
                        return;
                    }
                }
            }
        }

        self.link.store(None);
        if self.transition(ConnectionEvent::Stopped).is_err() {
            debug!(state = %self.state(), "Supervisor stopped outside an active state.");
        }
        info!("Connection supervisor stopped.");
    }

    /// Loads stored credentials and asks the transport for a new session.
    async fn open_session(&self) -> Result<Session, ConnectionError> {
        let credentials = self
            .credentials
            .load(&self.session_id)
            .await
            .map_err(|e| ConnectionError::CredentialStore(e.to_string()))?;
        debug!(resuming = credentials.is_some(), "Opening transport session.");
        Ok(self.transport.connect(&self.session_id, credentials).await?)
    }

    /// Feeds session events through the state machine until the session ends.
    async fn run_session(
        &self,
        mut session: Session,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => return SessionEnd::Shutdown,
                event = session.events.recv() => event,
            };
            let event = event.unwrap_or_else(|| {
                TransportEvent::Closed(DisconnectReason::from_status(None, "event stream ended"))
            });

            match event {
                TransportEvent::Open => {
                    self.link.store(Some(Arc::new(SessionLink {
                        sender: Arc::clone(&session.sender),
                    })));
                    match self.transition(ConnectionEvent::Opened) {
                        Ok(_) => {
                            self.pairing_tx.send_replace(None);
                            info!("Transport session open; ready to send.");
                        }
                        Err(e) => debug!(error = %e, "Ignoring unexpected open event."),
                    }
                }
                TransportEvent::PairingChallenge(payload) => self.surface_pairing(payload),
                TransportEvent::CredentialsUpdated(credentials) => {
                    match self.credentials.save(&self.session_id, &credentials).await {
                        Ok(()) => debug!("Persisted updated credentials."),
                        Err(e) => error!(error = %e, "Failed to persist updated credentials."),
                    }
                }
                TransportEvent::Closed(reason) => {
                    self.link.store(None);
                    warn!(%reason, "Transport session closed.");
                    let logged_out = reason.is_logout();
                    if let Err(e) = self.transition(ConnectionEvent::Closed(reason)) {
                        error!(error = %e, "Close event did not match the connection state.");
                    }
                    return if logged_out {
                        SessionEnd::LoggedOut
                    } else {
                        SessionEnd::Lost
                    };
                }
            }
        }
    }

    fn surface_pairing(&self, payload: String) {
        self.metrics.pairing_challenges_total.increment(1);
        warn!(
            pairing = %payload,
            "Pairing required: link this device from the primary phone using the code above."
        );
        self.pairing_tx.send_replace(Some(PairingChallenge {
            payload,
            issued_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }));
    }
}

/// Sleeps for `delay`; returns `false` if shutdown fired first.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
