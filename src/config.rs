//! Configuration management for AlertRelay
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer built-in defaults, an `alertrelay.toml` file, environment
//! variables and command-line arguments, in that order of precedence.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cli::Cli;
use crate::core::Recipient;
use crate::session::ReconnectPolicy;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "alertrelay.toml";

/// Prefix for environment overrides, e.g. `ALERTRELAY_SERVER__PORT=8080`.
pub const ENV_PREFIX: &str = "ALERTRELAY_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("alert.recipients must contain at least one recipient")]
    NoRecipients,

    #[error("alert.recipients[{0}] is blank")]
    BlankRecipient(usize),

    #[error("alert.message_template must not be blank")]
    BlankTemplate,

    #[error("session.session_id must not be blank")]
    BlankSessionId,
}

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application, used when `RUST_LOG` is unset.
    pub log_level: String,
    /// The HTTP control surface.
    pub server: ServerConfig,
    /// Alert defaults applied when a request leaves a field out.
    pub alert: AlertConfig,
    /// The messaging session.
    pub session: SessionConfig,
    /// Prometheus export.
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AlertConfig {
    /// Default recipient set, in send order.
    pub recipients: Vec<String>,
    /// Body template; `{location}`, `{time}` and `{date}` are substituted.
    pub message_template: String,
    pub default_location: String,
    /// Fixed body sent by `POST /test`.
    pub test_message: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SessionConfig {
    /// Identity under which credentials are stored and the bridge session is opened.
    pub session_id: String,
    pub credentials_dir: PathBuf,
    /// WebSocket URL of the messaging bridge.
    pub bridge_url: String,
    pub reconnect_delay_ms: u64,
    pub connect_retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

impl Config {
    /// Loads and validates the application configuration.
    ///
    /// Precedence, lowest first: built-in defaults, the TOML file named by
    /// `--config` (or `alertrelay.toml` if present), `ALERTRELAY_*`
    /// environment variables, then explicit command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(cli.clone())
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the rest of the service relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alert.recipients.is_empty() {
            return Err(ConfigError::NoRecipients);
        }
        if let Some(index) = self.alert.recipients.iter().position(|r| r.trim().is_empty()) {
            return Err(ConfigError::BlankRecipient(index));
        }
        if self.alert.message_template.trim().is_empty() {
            return Err(ConfigError::BlankTemplate);
        }
        if self.session.session_id.trim().is_empty() {
            return Err(ConfigError::BlankSessionId);
        }
        Ok(())
    }

    /// The default recipient set. Blank entries are skipped; `validate`
    /// rejects them up front.
    pub fn recipients(&self) -> Vec<Recipient> {
        self.alert
            .recipients
            .iter()
            .filter_map(|r| Recipient::parse(r.as_str()).ok())
            .collect()
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            reconnect_delay: Duration::from_millis(self.session.reconnect_delay_ms),
            connect_retry_delay: Duration::from_millis(self.session.connect_retry_delay_ms),
        }
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig {
                bind: "0.0.0.0".to_string(),
                port: 3000,
            },
            alert: AlertConfig {
                recipients: vec![],
                message_template:
                    "🚨 EMERGENCY ALERT 🚨\n\nHelp requested at {location}.\nTime: {time}\nDate: {date}"
                        .to_string(),
                default_location: "Home".to_string(),
                test_message: "✅ Test message from the emergency alert system. No action needed."
                    .to_string(),
            },
            session: SessionConfig {
                session_id: "default".to_string(),
                credentials_dir: PathBuf::from("auth_info"),
                bridge_url: "ws://127.0.0.1:8085/session".to_string(),
                reconnect_delay_ms: 3000,
                connect_retry_delay_ms: 5000,
            },
            metrics: MetricsConfig::default(),
        }
    }
}
