//! Inference backend capability
//!
//! Callers depend only on [`InferenceBackend`]; transports are adapters. The HTTP
//! adapter speaks the KServe v2 JSON protocol. No adapter retries internally:
//! retry policy belongs to whoever calls the gateway.

pub mod http;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::codec::TensorBatch;
use crate::models::inference::InferResponse;

pub use http::HttpInferenceClient;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    /// Backend unreachable, connection dropped, or the call timed out
    #[error("inference backend unreachable: {message}")]
    Transport { message: String, timed_out: bool },
    /// The backend ran the request and reported a failure
    #[error("inference backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    /// The backend answered with something that does not follow the protocol
    #[error("malformed inference response: {0}")]
    Protocol(String),
}

impl InferenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Backend { .. } => "backend",
            Self::Protocol(_) => "protocol",
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Raw backend output: one score per input row
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub scores: Vec<f64>,
    pub model_name: Option<String>,
    pub model_version: Option<String>,
}

impl TryFrom<InferResponse> for InferenceResult {
    type Error = InferenceError;

    fn try_from(response: InferResponse) -> Result<Self, Self::Error> {
        let output = response
            .outputs
            .and_then(|outputs| outputs.into_iter().next())
            .ok_or_else(|| InferenceError::Protocol("response has no outputs".to_string()))?;

        let scores = output.data.ok_or_else(|| {
            InferenceError::Protocol(format!("output '{}' has no data", output.name))
        })?;

        Ok(Self {
            scores,
            model_name: response.model_name,
            model_version: response.model_version,
        })
    }
}

/// A remote model server that turns a tensor into raw scores.
///
/// Implementations must be safe to share across concurrently running requests.
#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    /// Model identifier recorded in audit entries
    fn model_name(&self) -> &str;

    /// Run one inference call, bounded by the adapter's timeout
    async fn infer(&self, batch: &TensorBatch) -> Result<InferenceResult, InferenceError>;

    /// Check that the backend has the model loaded and can serve it
    async fn ready(&self) -> Result<(), InferenceError>;

    /// Release the connection. Default: nothing to release.
    async fn close(&self) {}
}

/// Probe readiness until it succeeds or `attempts` probes have failed
pub async fn wait_until_ready(
    backend: &dyn InferenceBackend,
    attempts: u32,
    delay: Duration,
) -> Result<(), InferenceError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match backend.ready().await {
            Ok(()) => {
                tracing::info!(model = backend.model_name(), attempt, "Inference backend ready");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    model = backend.model_name(),
                    attempt,
                    attempts,
                    error = %e,
                    "Inference backend not ready, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
