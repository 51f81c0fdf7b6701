use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    audit::{AmqpPublishConnector, AuditSink, ReconnectingPublisher},
    codec::FeatureSchema,
    config::Config,
    gateway::Gateway,
    handlers::{self, AppState},
    inference::{self, HttpInferenceClient, InferenceBackend},
    metrics,
    signals::setup_signal_handlers,
};

/// Start the scoring gateway
///
/// This function:
/// 1. Initializes metrics and signal handlers
/// 2. Waits for the inference backend to report the model ready
/// 3. Connects the audit publisher to the broker
/// 4. Serves requests until a shutdown signal, draining in-flight work
/// 5. Flushes pending audit entries and closes both connections
pub async fn start_server(config: Config) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let backend = Arc::new(
        HttpInferenceClient::new(&config.backend).context("Failed to build inference client")?,
    );
    info!(url = backend.infer_url(), "Waiting for inference backend");
    inference::wait_until_ready(
        backend.as_ref(),
        config.backend.startup_attempts,
        config.backend.startup_retry_delay(),
    )
    .await
    .context("Inference backend never became ready")?;

    let publisher = ReconnectingPublisher::start(
        Arc::new(AmqpPublishConnector::new(&config.broker)),
        config.broker.startup_attempts,
        config.broker.reconnect_delay(),
    )
    .await
    .context("Failed to connect audit publisher")?;
    let audit = AuditSink::spawn(Arc::new(publisher), config.gateway.audit_buffer);

    let schema = FeatureSchema::new(config.features.order.clone())
        .with_input_name(config.backend.input_name.clone());
    let backend: Arc<dyn InferenceBackend> = backend;
    let gateway = Arc::new(Gateway::new(
        schema,
        backend,
        audit,
        config.gateway.max_batch_size,
    ));

    let app = create_router(
        AppState {
            gateway: gateway.clone(),
        },
        metrics_handle,
    );

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting scoring gateway on {}", addr);
    info!(
        model = %config.backend.model_name,
        features = config.features.order.len(),
        queue = %config.broker.queue,
        "Configuration loaded"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    gateway.shutdown().await;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(app_state: AppState, metrics_handle: Arc<PrometheusHandle>) -> Router {
    let scoring_routes = Router::new()
        .route("/predict", post(handlers::predict::handle_predict))
        .route("/predict/batch", post(handlers::predict::handle_predict_batch))
        .route("/ready", get(handlers::health::readiness_check))
        .with_state(app_state);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(scoring_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
}
