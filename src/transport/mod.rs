//! Concrete transports for the session layer.

pub mod bridge;

pub use bridge::BridgeTransport;
