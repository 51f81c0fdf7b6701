//! Non-blocking hand-off from the request path to the audit publisher
//!
//! Request handlers push finished entries into a bounded channel and move on. A
//! single background task drains the channel into the [`LogPublisher`]. Nothing
//! here can fail or slow down a prediction response:
//! - a full channel drops the batch with a warning
//! - a publish failure is logged and counted
//! - shutdown drains whatever is still queued before closing the publisher

use futures::FutureExt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::publisher::LogPublisher;
use crate::metrics;
use crate::models::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("audit buffer is full")]
    Full,
    #[error("audit sink is closed")]
    Closed,
}

/// Handle used by the gateway to submit audit entries
pub struct AuditSink {
    tx: mpsc::Sender<Vec<LogEntry>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditSink {
    /// Spawn the publish worker
    ///
    /// # Arguments
    /// * `publisher` - Durable queue producer
    /// * `capacity` - Number of pending batches held before new ones are dropped
    pub fn spawn(publisher: Arc<dyn LogPublisher>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(publish_worker(publisher, rx, shutdown_rx))
                .catch_unwind()
                .await;
            if let Err(e) = result {
                tracing::error!(panic = ?e, "Audit publish worker panicked");
            }
        });

        Self {
            tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue entries for publishing without waiting
    pub fn submit(&self, entries: Vec<LogEntry>) -> Result<(), SubmitError> {
        self.tx.try_send(entries).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Publish everything already queued, then close the publisher.
    ///
    /// Later calls to [`submit`](Self::submit) fail with [`SubmitError::Closed`].
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Audit publish worker failed to join");
            }
        }
    }
}

async fn publish_worker(
    publisher: Arc<dyn LogPublisher>,
    mut rx: mpsc::Receiver<Vec<LogEntry>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(entries) => publish_batch(publisher.as_ref(), entries).await,
                None => break,
            },
            _ = shutdown.changed() => {
                rx.close();
                let mut drained = 0usize;
                while let Some(entries) = rx.recv().await {
                    publish_batch(publisher.as_ref(), entries).await;
                    drained += 1;
                }
                tracing::info!(drained, "Audit sink drained");
                break;
            }
        }
    }

    publisher.close().await;
    tracing::info!("Audit publish worker stopped");
}

async fn publish_batch(publisher: &dyn LogPublisher, entries: Vec<LogEntry>) {
    match publisher.publish(&entries).await {
        Ok(()) => {
            metrics::record_audit_publish("success", entries.len());
            tracing::debug!(entries = entries.len(), "Published audit entries");
        }
        Err(e) => {
            metrics::record_audit_publish(e.kind(), entries.len());
            tracing::error!(
                error = %e,
                entries = entries.len(),
                "Failed to publish audit entries"
            );
        }
    }
}
