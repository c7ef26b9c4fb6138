//! AlertRelay - relays emergency alerts to messaging recipients
//!
//! This library keeps one authenticated messaging session alive, renders alert
//! bodies from a template, fans them out to a recipient set and exposes all of
//! it through a small HTTP control API.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod internal_metrics;
pub mod session;
pub mod task_manager;
pub mod templating;
pub mod transport;

// Re-export core types for convenience
pub use core::*;
