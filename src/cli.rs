//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged over
//! the configuration from the `alertrelay.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Relays emergency alerts to a fixed set of messaging recipients.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port for the HTTP control surface.
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Address the HTTP control surface binds to.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Location used when an alert request does not name one.
    #[arg(long, value_name = "NAME")]
    pub location: Option<String>,

    /// WebSocket URL of the messaging bridge.
    #[arg(long, value_name = "URL")]
    pub bridge_url: Option<String>,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        let mut server = Dict::new();
        if let Some(port) = self.port {
            server.insert("port".into(), Value::from(port));
        }
        if let Some(bind) = &self.bind {
            server.insert("bind".into(), Value::from(bind.clone()));
        }

        let mut alert = Dict::new();
        if let Some(location) = &self.location {
            alert.insert("default_location".into(), Value::from(location.clone()));
        }

        let mut session = Dict::new();
        if let Some(url) = &self.bridge_url {
            session.insert("bridge_url".into(), Value::from(url.clone()));
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        // Only emit sections that carry an override so they don't mask lower layers.
        for (name, inner) in [("server", server), ("alert", alert), ("session", session)] {
            if !inner.is_empty() {
                dict.insert(name.into(), Value::Dict(Tag::Default, inner));
            }
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
