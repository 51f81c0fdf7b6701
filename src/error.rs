use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::gateway::GatewayError;
use crate::inference::InferenceError;

/// HTTP-facing error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed body or features that do not match the schema
    Validation(String),
    /// Gateway is draining and accepts no new work
    ShuttingDown,
    /// Inference backend unreachable or too slow
    Transport { message: String, timed_out: bool },
    /// Inference backend answered with an error status
    Backend { status: u16, message: String },
    /// Inference backend answered with an unusable body
    Protocol(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::ShuttingDown => write!(f, "Service is shutting down"),
            Self::Transport { message, .. } => write!(f, "Inference backend unreachable: {}", message),
            Self::Backend { status, message } => {
                write!(f, "Inference backend error ({}): {}", status, message)
            }
            Self::Protocol(msg) => write!(f, "Invalid inference response: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transport { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport { .. } | Self::Backend { .. } | Self::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation_error",
        AppError::ShuttingDown => "shutting_down",
        AppError::Transport { .. } => "transport_error",
        AppError::Backend { .. } => "backend_error",
        AppError::Protocol(_) => "protocol_error",
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Validation(msg) => Self::Validation(msg),
            GatewayError::ShuttingDown => Self::ShuttingDown,
            GatewayError::Inference(InferenceError::Transport { message, timed_out }) => {
                Self::Transport { message, timed_out }
            }
            GatewayError::Inference(InferenceError::Backend { status, message }) => {
                Self::Backend { status, message }
            }
            GatewayError::Inference(InferenceError::Protocol(msg)) => Self::Protocol(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}
