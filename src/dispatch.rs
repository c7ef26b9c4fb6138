//! Fan-out of one rendered alert to many recipients.

use crate::{
    core::{DispatchOutcome, DispatchResult, Recipient},
    internal_metrics::Metrics,
    session::ConnectionManager,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The session was not ready when the dispatch started; nothing was sent.
    #[error("WhatsApp not connected")]
    ServiceUnavailable,

    #[error("no recipients to dispatch to")]
    NoRecipients,
}

/// Sends one message to a set of recipients concurrently and collects every
/// per-recipient outcome.
#[derive(Clone)]
pub struct AlertDispatcher {
    connection: Arc<ConnectionManager>,
    metrics: Arc<Metrics>,
}

impl AlertDispatcher {
    pub fn new(connection: Arc<ConnectionManager>, metrics: Arc<Metrics>) -> Self {
        Self {
            connection,
            metrics,
        }
    }

    /// Best-effort broadcast of `message` to `recipients`.
    ///
    /// Fails only when the session is not ready at call time. Otherwise every
    /// recipient gets exactly one send attempt, all attempts run concurrently,
    /// and the returned outcomes follow the order of `recipients`.
    #[instrument(skip_all, fields(recipients = recipients.len()))]
    pub async fn dispatch(
        &self,
        recipients: &[Recipient],
        message: &str,
    ) -> Result<DispatchResult, DispatchError> {
        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }
        if !self.connection.is_ready() {
            warn!("Dispatch rejected: session not ready.");
            return Err(DispatchError::ServiceUnavailable);
        }

        self.metrics.alerts_dispatched_total.increment(1);
        let start = Instant::now();

        let sends = recipients.iter().map(|recipient| async move {
            match self.connection.send(recipient, message).await {
                Ok(()) => {
                    self.metrics.messages_sent_total.increment(1);
                    DispatchOutcome::delivered(recipient.clone())
                }
                Err(e) => {
                    self.metrics.messages_failed_total.increment(1);
                    warn!(%recipient, error = %e, "Send failed.");
                    DispatchOutcome::failed(recipient.clone(), e)
                }
            }
        });
        let result = DispatchResult::from_outcomes(join_all(sends).await);

        self.metrics
            .dispatch_duration_seconds
            .record(start.elapsed().as_secs_f64());
        info!(
            total = result.total(),
            delivered = result.success_count(),
            failed = result.failure_count(),
            "Dispatch finished."
        );
        Ok(result)
    }
}
