//! Inference gateway
//!
//! Synchronous path: validate → encode → infer → decode → transform → respond.
//! Asynchronous path: the same rows, with their probabilities, are handed to the
//! audit sink. The response never waits on, or fails because of, the audit path.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;

use crate::audit::AuditSink;
use crate::codec::{self, FeatureSchema};
use crate::inference::{InferenceBackend, InferenceError, InferenceResult};
use crate::metrics;
use crate::models::{LogEntry, PredictionRequest};
use crate::transform;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Inference(e) => e.kind(),
            Self::ShuttingDown => "shutting_down",
        }
    }
}

pub struct Gateway {
    schema: FeatureSchema,
    backend: Arc<dyn InferenceBackend>,
    audit: AuditSink,
    max_batch_size: usize,
    shutting_down: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Keeps the in-flight count accurate on every exit path
struct InFlightGuard<'a>(&'a Gateway);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Gateway {
    pub fn new(
        schema: FeatureSchema,
        backend: Arc<dyn InferenceBackend>,
        audit: AuditSink,
        max_batch_size: usize,
    ) -> Self {
        Self {
            schema,
            backend,
            audit,
            max_batch_size,
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Ready to serve: not draining and the backend has the model loaded
    pub async fn ready(&self) -> Result<(), GatewayError> {
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        self.backend.ready().await?;
        Ok(())
    }

    /// Score a single applicant
    pub async fn predict_one(&self, request: PredictionRequest) -> Result<f64, GatewayError> {
        let mut probabilities = self.predict_batch(vec![request]).await?;
        probabilities
            .pop()
            .ok_or_else(|| InferenceError::Protocol("no score returned".to_string()).into())
    }

    /// Score several applicants in one backend call; output order matches input order
    pub async fn predict_batch(
        &self,
        requests: Vec<PredictionRequest>,
    ) -> Result<Vec<f64>, GatewayError> {
        let _guard = self.enter()?;

        if requests.is_empty() {
            return Err(GatewayError::Validation(
                "at least one request is required".to_string(),
            ));
        }
        if requests.len() > self.max_batch_size {
            return Err(GatewayError::Validation(format!(
                "batch of {} exceeds the limit of {}",
                requests.len(),
                self.max_batch_size
            )));
        }
        for (row, request) in requests.iter().enumerate() {
            self.schema
                .validate(row, request)
                .map_err(|e| GatewayError::Validation(e.to_string()))?;
        }

        let batch = self
            .schema
            .encode(&requests)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;

        let start = Instant::now();
        let result = self.backend.infer(&batch).await;
        metrics::record_inference(
            match &result {
                Ok(_) => "success",
                Err(e) => e.kind(),
            },
            start.elapsed(),
        );
        let result = result?;

        let raw = codec::decode(&result, batch.rows)
            .map_err(|e| InferenceError::Protocol(e.to_string()))?;
        let probabilities = transform::transform(raw);

        tracing::debug!(
            rows = batch.rows,
            duration_ms = start.elapsed().as_millis(),
            "Scored batch"
        );
        metrics::record_rows_scored(batch.rows);

        self.submit_audit(&requests, &probabilities, &result);

        Ok(probabilities)
    }

    /// Stop accepting work, wait for in-flight predictions, then drain the audit
    /// sink and release both connections.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        loop {
            let idle = self.idle.notified();
            let in_flight = self.in_flight.load(Ordering::SeqCst);
            if in_flight == 0 {
                break;
            }
            tracing::info!(in_flight, "Waiting for in-flight predictions");
            idle.await;
        }

        self.audit.close().await;
        self.backend.close().await;
        tracing::info!("Gateway shut down");
    }

    fn enter(&self) -> Result<InFlightGuard<'_>, GatewayError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(self);
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        Ok(guard)
    }

    fn submit_audit(
        &self,
        requests: &[PredictionRequest],
        probabilities: &[f64],
        result: &InferenceResult,
    ) {
        let timestamp = Utc::now();
        let model_identifier = match &result.model_version {
            Some(version) => format!("{}:{}", self.backend.model_name(), version),
            None => self.backend.model_name().to_string(),
        };

        let entries: Vec<LogEntry> = requests
            .iter()
            .zip(probabilities)
            .map(|(request, probability)| LogEntry {
                timestamp,
                input_features: self.schema.project(request),
                prediction_probability: *probability,
                model_identifier: model_identifier.clone(),
            })
            .collect();

        let count = entries.len();
        if let Err(e) = self.audit.submit(entries) {
            metrics::record_audit_dropped(&e);
            tracing::warn!(error = %e, entries = count, "Dropped audit entries");
        }
    }
}
