use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::handlers::AppState;

/// Handle /health: the process is up
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Handle /ready: the gateway accepts traffic and the backend can serve the model
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.gateway.ready().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready", "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}
