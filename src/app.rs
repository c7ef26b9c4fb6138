//! The main application logic, decoupled from the entry point.

use crate::{
    api::{AlertDefaults, ApiServer, AppState},
    config::Config,
    core::{CredentialStore, SessionTransport},
    dispatch::AlertDispatcher,
    internal_metrics::{Metrics, MetricsBuilder},
    session::{ConnectionManager, FileCredentialStore},
    task_manager::TaskManager,
    transport::BridgeTransport,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    connection: Arc<ConnectionManager>,
    api_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the control API is actually listening on.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn connection(&self) -> Arc<ConnectionManager> {
        self.connection.clone()
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Separates constructing the component graph from running it, and lets tests
/// swap in a fake transport, an in-memory credential store or a metrics handle.
pub struct AppBuilder {
    config: Config,
    transport_override: Option<Arc<dyn SessionTransport>>,
    credential_store_override: Option<Arc<dyn CredentialStore>>,
    metrics_override: Option<Metrics>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport_override: None,
            credential_store_override: None,
            metrics_override: None,
        }
    }

    /// Overrides the messaging transport for testing.
    pub fn transport_override(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport_override = Some(transport);
        self
    }

    /// Overrides the credential store for testing.
    pub fn credential_store_override(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store_override = Some(store);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Builds and starts all application components, returning a runnable `App`.
    ///
    /// The control API is listening and the first connection attempt has been
    /// started by the time this returns.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Initialize Metrics
        // =========================================================================
        let (metrics, metrics_server_info) = match self.metrics_override {
            Some(m) => (m, None),
            None => {
                MetricsBuilder::new(config.metrics.clone())
                    .build(&task_manager)
                    .await
            }
        };
        let metrics = Arc::new(metrics);

        let metrics_addr = if let Some((server, addr)) = metrics_server_info {
            task_manager.spawn("MetricsServer", server.run());
            info!("Metrics server listening on {}", addr);
            Some(addr)
        } else {
            None
        };

        // =========================================================================
        // 2. Session
        // =========================================================================
        let transport: Arc<dyn SessionTransport> = match self.transport_override {
            Some(transport) => transport,
            None => Arc::new(BridgeTransport::new(config.session.bridge_url.clone())),
        };
        let credentials: Arc<dyn CredentialStore> = match self.credential_store_override {
            Some(store) => store,
            None => Arc::new(FileCredentialStore::new(config.session.credentials_dir.clone())),
        };
        let connection = ConnectionManager::new(
            config.session.session_id.clone(),
            transport,
            credentials,
            config.reconnect_policy(),
            task_manager.clone(),
            metrics.clone(),
        );

        // =========================================================================
        // 3. Control API
        // =========================================================================
        let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("binding control API to {}", bind_addr))?;
        let api_addr = listener.local_addr()?;

        let state = AppState {
            connection: connection.clone(),
            dispatcher: AlertDispatcher::new(connection.clone(), metrics.clone()),
            defaults: Arc::new(AlertDefaults::from_config(&config)),
            metrics,
        };
        let server = ApiServer::new(listener, state, task_manager.get_shutdown_rx());
        task_manager.spawn("ControlApi", server.run());

        // =========================================================================
        // 4. Start connecting
        // =========================================================================
        connection.connect();

        Ok(App {
            task_manager,
            connection,
            api_addr,
            metrics_addr,
        })
    }
}
