//! AlertRelay - emergency alert relay
//!
//! Loads configuration, starts the control API and the messaging session, and
//! runs until Ctrl-C.

use alertrelay::{app::App, cli::Cli, config::Config};
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            error!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    info!("AlertRelay starting up...");

    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Listen Address: {}:{}", config.server.bind, config.server.port);
    info!("Recipients: {}", config.alert.recipients.len());
    info!("Default Location: {}", config.alert.default_location);
    info!("Session Id: {}", config.session.session_id);
    info!("Credentials Dir: {}", config.session.credentials_dir.display());
    info!("Bridge URL: {}", config.session.bridge_url);
    info!(
        "Reconnect Delay: {}ms, Connect Retry Delay: {}ms",
        config.session.reconnect_delay_ms, config.session.connect_retry_delay_ms
    );
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            format!("Enabled ({})", config.metrics.listen_address)
        } else {
            "Disabled".to_string()
        }
    );
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    info!("AlertRelay ready on {}", app.api_addr());

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("AlertRelay stopped.");
    Ok(())
}
