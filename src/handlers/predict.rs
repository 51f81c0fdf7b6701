use crate::{
    error::AppError,
    gateway::Gateway,
    metrics,
    models::{BatchPredictResponse, PredictResponse, PredictionRequest},
};
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use std::sync::Arc;
use std::time::Instant;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Handle POST /predict
pub async fn handle_predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let start = Instant::now();

    let result = match payload {
        Ok(Json(request)) => state
            .gateway
            .predict_one(request)
            .await
            .map_err(AppError::from),
        Err(rejection) => Err(rejection.into()),
    };

    let result = result.map(|probability| PredictResponse { probability });
    finish("/predict", start, 1, result)
}

/// Handle POST /predict/batch
pub async fn handle_predict_batch(
    State(state): State<AppState>,
    payload: Result<Json<Vec<PredictionRequest>>, JsonRejection>,
) -> Result<Json<BatchPredictResponse>, AppError> {
    let start = Instant::now();

    let (rows, result) = match payload {
        Ok(Json(requests)) => (
            requests.len(),
            state
                .gateway
                .predict_batch(requests)
                .await
                .map_err(AppError::from),
        ),
        Err(rejection) => (0, Err(rejection.into())),
    };

    let result = result.map(|probabilities| BatchPredictResponse { probabilities });
    finish("/predict/batch", start, rows, result)
}

fn finish<T>(
    endpoint: &str,
    start: Instant,
    rows: usize,
    result: Result<T, AppError>,
) -> Result<Json<T>, AppError> {
    match &result {
        Ok(_) => {
            metrics::record_request(endpoint, 200);
            tracing::info!(
                endpoint,
                rows,
                duration_ms = start.elapsed().as_millis(),
                "Completed prediction request"
            );
        }
        Err(e) => {
            let status = e.status();
            metrics::record_request(endpoint, status.as_u16());
            if status.is_server_error() {
                tracing::error!(endpoint, rows, status = status.as_u16(), error = %e, "Prediction request failed");
            } else {
                tracing::warn!(endpoint, rows, error = %e, "Rejected prediction request");
            }
        }
    }
    result.map(Json)
}
