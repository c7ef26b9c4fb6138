//! Session lifecycle: the connection state machine, the manager that drives it
//! from transport events, and credential persistence.

pub mod credentials;
pub mod manager;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::core::TransportError;

pub use credentials::FileCredentialStore;
pub use manager::ConnectionManager;
pub use state::{ConnectionEvent, ConnectionState, InvalidTransition};

/// Fixed retry delays; neither grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait after a non-logout disconnect before connecting again.
    pub reconnect_delay: Duration,
    /// Wait after a failed connect attempt before trying again.
    pub connect_retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            connect_retry_delay: Duration::from_secs(5),
        }
    }
}

/// A pairing payload waiting to be acknowledged on the primary device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingChallenge {
    pub payload: String,
    /// ISO-8601 time at which the transport issued the challenge.
    pub issued_at: String,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("WhatsApp not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("re-pairing is only possible after a logout (current state: {0})")]
    NotLoggedOut(ConnectionState),

    #[error("credential store failure: {0}")]
    CredentialStore(String),
}
