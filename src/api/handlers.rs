use axum::{body::Bytes, extract::State, http::StatusCode, response::Json};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{request::AlertRequest, ApiError, AppState};
use crate::core::{DispatchOutcome, DispatchResult, Recipient};
use crate::session::{ConnectionError, ConnectionState, PairingChallenge};

/// `200` body for `/alert` and `/test`.
#[derive(Serialize, Debug)]
pub struct AlertResponse {
    pub success: bool,
    /// The body that was sent.
    pub message: String,
    pub timestamp: String,
    /// How many recipients were attempted.
    pub recipients: usize,
    pub results: Vec<DispatchOutcome>,
}

impl AlertResponse {
    fn new(message: String, result: DispatchResult) -> Self {
        Self {
            success: true,
            message,
            timestamp: timestamp(),
            recipients: result.total(),
            results: result.into_outcomes(),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub whatsapp_connected: bool,
    pub connection_state: ConnectionState,
    pub timestamp: String,
}

#[derive(Serialize, Debug)]
pub struct PairingResponse {
    pub state: ConnectionState,
    pub pairing: Option<PairingChallenge>,
}

#[derive(Serialize, Debug)]
pub struct PairResponse {
    pub success: bool,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl AppState {
    fn ensure_ready(&self) -> Result<(), ApiError> {
        if self.connection.is_ready() {
            Ok(())
        } else {
            self.metrics.increment_alert_rejected("not_connected");
            warn!(state = %self.connection.state(), "Rejecting request: session not ready");
            Err(ApiError::ServiceUnavailable)
        }
    }

    async fn send(&self, recipients: &[Recipient], body: String) -> Result<AlertResponse, ApiError> {
        let result = self.dispatcher.dispatch(recipients, &body).await?;
        Ok(AlertResponse::new(body, result))
    }
}

#[instrument(skip_all)]
pub async fn alert(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AlertResponse>, ApiError> {
    state.ensure_ready()?;

    let resolved = AlertRequest::from_body(&body)
        .and_then(|request| request.resolve(&state.defaults))
        .inspect_err(|e| {
            state.metrics.increment_alert_rejected("invalid_request");
            warn!(error = %e, "Rejecting invalid alert request");
        })?;

    info!(
        location = %resolved.location,
        recipients = resolved.recipients.len(),
        "Alert requested"
    );
    state.send(&resolved.recipients, resolved.body).await.map(Json)
}

#[instrument(skip_all)]
pub async fn test_message(State(state): State<AppState>) -> Result<Json<AlertResponse>, ApiError> {
    state.ensure_ready()?;
    info!(recipients = state.defaults.recipients.len(), "Test message requested");
    state
        .send(&state.defaults.recipients, state.defaults.test_message.clone())
        .await
        .map(Json)
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connection_state = state.connection.state();
    Json(HealthResponse {
        status: "running",
        whatsapp_connected: connection_state.is_ready(),
        connection_state,
        timestamp: timestamp(),
    })
}

pub async fn pairing(State(state): State<AppState>) -> Json<PairingResponse> {
    Json(PairingResponse {
        state: state.connection.state(),
        pairing: state.connection.pairing_challenge(),
    })
}

#[instrument(skip_all)]
pub async fn pair(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<PairResponse>), ApiError> {
    match state.connection.repair().await {
        Ok(()) => {
            info!("Re-pairing started");
            Ok((StatusCode::ACCEPTED, Json(PairResponse { success: true })))
        }
        Err(e @ ConnectionError::NotLoggedOut(_)) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}
