//! The connection state machine.
//!
//! Transitions are a pure function of the current state and an event, so the
//! reconnect-versus-halt decision can be exercised without a transport.

use crate::core::DisconnectReason;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of the transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until an operator re-pairs.
    LoggedOut,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Opened,
    Closed(DisconnectReason),
    RetryElapsed,
    RepairRequested,
    Stopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    /// Returns the state reached by applying `event`, or `InvalidTransition`.
    pub fn next(self, event: &ConnectionEvent) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self, event) {
            (S::Disconnected, E::ConnectRequested) => S::Connecting,
            (S::Connecting, E::Opened) => S::Connected,
            (S::Connecting | S::Connected, E::Closed(reason)) if reason.is_logout() => S::LoggedOut,
            (S::Connecting | S::Connected, E::Closed(_)) => S::Reconnecting,
            (S::Reconnecting, E::RetryElapsed) => S::Connecting,
            (S::LoggedOut, E::RepairRequested) => S::Disconnected,
            (S::Connecting | S::Connected | S::Reconnecting, E::Stopped) => S::Disconnected,
            _ => {
                return Err(InvalidTransition {
                    from: self,
                    event: event.clone(),
                })
            }
        };
        Ok(next)
    }

    /// Sends may be attempted only in `Connected`.
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::LoggedOut
    }

    /// Stable numeric code used for the `connection_state` gauge.
    pub fn code(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::LoggedOut => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
