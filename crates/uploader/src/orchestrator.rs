//! Upload orchestrator: event channel, cancellation, whole-sequence retry.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::ServerConnection;
use crate::error::UploadError;
use crate::types::{UploadConfig, UploadEvent, UploadOutcome};
use crate::upload::FileUpload;

/// Pause between a failed attempt and the next one.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Drives [`FileUpload`] runs and reports their progress.
pub struct UploadOrchestrator {
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
    retries: u32,
    retry_delay: Duration,
}

impl Default for UploadOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadOrchestrator {
    /// Creates an orchestrator that does not retry.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Runs the whole sequence up to `retries` more times after a failure.
    ///
    /// Re-running is safe: the server keeps stored chunks, so a retry
    /// only sends what is still missing.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this orchestrator's uploads.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads one file, retrying non-cancellation failures.
    pub async fn upload(
        &self,
        config: &UploadConfig,
        conn: &dyn ServerConnection,
    ) -> Result<UploadOutcome, UploadError> {
        let server = conn.server_id().to_string();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let result = FileUpload::new(conn, self.cancel.clone())
                .run(config, &self.events_tx)
                .await;

            let err = match result {
                Ok(outcome) => {
                    info!(
                        %server,
                        address = %outcome.address,
                        chunks_sent = outcome.chunks_sent,
                        attempt,
                        "upload finished"
                    );
                    self.emit(UploadEvent::Completed {
                        address: outcome.address.clone(),
                        deduplicated: outcome.deduplicated(),
                    })
                    .await;
                    return Ok(outcome);
                }
                Err(e) => e,
            };

            if err.is_retryable() && attempt <= self.retries {
                warn!(%server, attempt, error = %err, "upload attempt failed, retrying");
                self.emit(UploadEvent::Retrying {
                    attempt,
                    error: err.to_string(),
                })
                .await;

                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return self.fail(&server, UploadError::Cancelled).await;
                    }
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
                continue;
            }

            return self.fail(&server, err).await;
        }
    }

    async fn fail(&self, server: &str, err: UploadError) -> Result<UploadOutcome, UploadError> {
        let message = err.to_string();
        error!(%server, error = %message, "upload failed");
        self.emit(UploadEvent::Failed { error: message }).await;
        Err(err)
    }

    async fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.send(event).await;
    }
}
