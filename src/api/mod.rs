//! # Control API
//!
//! The HTTP boundary of the relay. Handlers only parse, resolve defaults and
//! orchestrate; the dispatcher and the connection manager do the work.
//!
//! - `POST /alert`: render and fan out an alert
//! - `POST /test`: fan out the configured diagnostic message
//! - `GET|POST /health`: report readiness without side effects
//! - `GET /pairing`: the pending pairing challenge, if any
//! - `POST /pair`: start re-pairing after a logout

pub mod handlers;
pub mod request;

use std::future::Future;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, trace};

use crate::dispatch::{AlertDispatcher, DispatchError};
use crate::internal_metrics::Metrics;
use crate::session::ConnectionManager;

pub use request::{AlertDefaults, AlertRequest, ResolvedAlert, ValidationError};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<ConnectionManager>,
    pub dispatcher: AlertDispatcher,
    pub defaults: Arc<AlertDefaults>,
    pub metrics: Arc<Metrics>,
}

/// Builds the control router (shared between production startup and tests).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/alert", post(handlers::alert))
        .route("/test", post(handlers::test_message))
        .route("/health", get(handlers::health).post(handlers::health))
        .route("/pairing", get(handlers::pairing))
        .route("/pair", post(handlers::pair))
        .with_state(state)
}

/// Errors a handler turns into a `{ success: false, error }` response.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("WhatsApp not connected")]
    ServiceUnavailable,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::ServiceUnavailable => Self::ServiceUnavailable,
            DispatchError::NoRecipients => Self::Validation(ValidationError::EmptyRecipients),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The control HTTP server.
pub struct ApiServer {
    listener: TcpListener,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    /// Creates a new `ApiServer` but does not spawn it.
    ///
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `state` - The handler state.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(listener: TcpListener, state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            listener,
            state,
            shutdown_rx,
        }
    }

    /// Returns a future that serves requests until a shutdown signal is received.
    pub fn run(self) -> impl Future<Output = ()> {
        let app = router(self.state);
        let mut shutdown_rx = self.shutdown_rx;
        let listener = self.listener;

        async move {
            if let Ok(addr) = listener.local_addr() {
                info!("Control API listening on {}", addr);
            }
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.changed().await.ok();
                    trace!("Control API received shutdown signal.");
                })
                .await;
            if let Err(e) = result {
                error!("Control API server error: {}", e);
            }
            trace!("Control API task finished.");
        }
    }
}
