//! Core domain types and service traits for AlertRelay
//!
//! This module defines the fundamental data structures and trait contracts
//! that govern component interactions throughout the application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Close status the messaging network uses to signal an explicit logout.
pub const LOGGED_OUT_STATUS: u16 = 401;

/// An addressable identifier for a message recipient.
///
/// The format is owned by the transport; the only rule enforced here is that
/// the identifier is not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(String);

impl Recipient {
    /// Parses a recipient identifier, rejecting blank input.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidRecipient> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(InvalidRecipient);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returned when a recipient identifier is blank.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("recipient must not be empty")]
pub struct InvalidRecipient;

/// The result of sending to a single recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub recipient: Recipient,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered(recipient: Recipient) -> Self {
        Self {
            recipient,
            success: true,
            error: None,
        }
    }

    pub fn failed(recipient: Recipient, error: impl fmt::Display) -> Self {
        Self {
            recipient,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// The aggregate of one fan-out, in recipient order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchResult {
    outcomes: Vec<DispatchOutcome>,
    succeeded: usize,
}

impl DispatchResult {
    pub fn from_outcomes(outcomes: Vec<DispatchOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        Self {
            outcomes,
            succeeded,
        }
    }

    pub fn outcomes(&self) -> &[DispatchOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<DispatchOutcome> {
        self.outcomes
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn success_count(&self) -> usize {
        self.succeeded
    }

    pub fn failure_count(&self) -> usize {
        self.total() - self.succeeded
    }
}

/// Opaque credential material produced by the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(Vec<u8>);

impl Credentials {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Never print the secret material.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({} bytes)", self.0.len())
    }
}

/// Why a transport session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The account explicitly logged this session out. Re-pairing is required.
    LoggedOut,
    /// Any other disconnect; the session may be resumed.
    ConnectionLost {
        status: Option<u16>,
        reason: String,
    },
}

impl DisconnectReason {
    /// Classifies a close status reported by the transport.
    pub fn from_status(status: Option<u16>, reason: impl Into<String>) -> Self {
        match status {
            Some(LOGGED_OUT_STATUS) => Self::LoggedOut,
            _ => Self::ConnectionLost {
                status,
                reason: reason.into(),
            },
        }
    }

    pub fn is_logout(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::ConnectionLost {
                status: Some(status),
                reason,
            } => write!(f, "connection lost ({status}): {reason}"),
            Self::ConnectionLost {
                status: None,
                reason,
            } => write!(f, "connection lost: {reason}"),
        }
    }
}

/// Events emitted by a live transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Closed(DisconnectReason),
    /// A one-time pairing payload that must be acknowledged out-of-band.
    PairingChallenge(String),
    CredentialsUpdated(Credentials),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    Connect(String),

    #[error("transport rejected message: {0}")]
    Rejected(String),

    #[error("transport session closed")]
    Closed,

    #[error("transport protocol error: {0}")]
    Protocol(String),
}

// =============================================================================
// Service Traits
// =============================================================================

/// Sends messages over one live session.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends a text message to a single recipient.
    ///
    /// # Returns
    /// * `Ok(())` once the transport has accepted the message
    /// * `Err` if the transport rejected it or the session went away
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<(), TransportError>;
}

/// One opened transport session: its event stream and its send handle.
pub struct Session {
    pub events: mpsc::Receiver<TransportEvent>,
    pub sender: Arc<dyn MessageSender>,
}

/// Opens authenticated sessions against the messaging network.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Opens a new session, resuming from `credentials` when they are present.
    ///
    /// Returning `Ok` means the session exists, not that it is ready; readiness
    /// is signalled later through `TransportEvent::Open`.
    async fn connect(
        &self,
        session_id: &str,
        credentials: Option<Credentials>,
    ) -> Result<Session, TransportError>;
}

/// Durable storage for credential material, keyed by session id.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<Credentials>>;

    async fn save(&self, session_id: &str, credentials: &Credentials) -> anyhow::Result<()>;

    /// Forgets stored credentials so the next connect must pair from scratch.
    async fn clear(&self, session_id: &str) -> anyhow::Result<()>;
}
