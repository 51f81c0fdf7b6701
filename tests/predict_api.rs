use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use scoring_gateway::{
    audit::{AuditSink, LogPublisher, PublishError},
    codec::{FeatureSchema, DEFAULT_FEATURE_ORDER},
    config::BackendConfig,
    gateway::Gateway,
    handlers::AppState,
    inference::HttpInferenceClient,
    models::LogEntry,
    server::create_router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<Vec<LogEntry>>>,
}

#[async_trait]
impl LogPublisher for RecordingPublisher {
    async fn publish(&self, entries: &[LogEntry]) -> Result<(), PublishError> {
        self.published.lock().unwrap().push(entries.to_vec());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    gateway: Arc<Gateway>,
    publisher: Arc<RecordingPublisher>,
}

fn backend_config(base_url: String) -> BackendConfig {
    BackendConfig {
        base_url,
        model_name: "home_credit_default".to_string(),
        model_version: None,
        input_name: "input".to_string(),
        timeout_ms: 2_000,
        startup_attempts: 1,
        startup_retry_delay_ms: 10,
    }
}

fn create_app(mock_server: &MockServer) -> TestApp {
    let backend = Arc::new(HttpInferenceClient::new(&backend_config(mock_server.uri())).unwrap());
    let publisher = Arc::new(RecordingPublisher::default());
    let gateway = Arc::new(Gateway::new(
        FeatureSchema::default(),
        backend,
        AuditSink::spawn(publisher.clone(), 16),
        8,
    ));

    let metrics_handle = Arc::new(
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle(),
    );
    let router = create_router(
        AppState {
            gateway: gateway.clone(),
        },
        metrics_handle,
    );

    TestApp {
        router,
        gateway,
        publisher,
    }
}

fn applicant() -> Value {
    json!({
        "AMT_INCOME_TOTAL": 202500.0,
        "AMT_CREDIT": 406597.5,
        "AMT_ANNUITY": 24700.5,
        "DAYS_BIRTH": -9461,
        "DAYS_EMPLOYED": -637,
        "bureau_credit_count": 8,
        "bureau_credit_active_count": 2,
        "bureau_credit_days_enddate_mean": -349.0,
        "bureau_amt_credit_sum": 108131.9,
        "bureau_amt_credit_sum_overdue": 0.0
    })
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn infer_response(scores: &[f64]) -> Value {
    json!({
        "model_name": "home_credit_default",
        "outputs": [{"name": "output", "shape": [scores.len(), 1], "datatype": "FP32", "data": scores}]
    })
}

#[tokio::test]
async fn test_predict_returns_probability_and_audits_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/models/home_credit_default/infer"))
        .and(body_partial_json(json!({
            "inputs": [{"name": "input", "shape": [1, 10], "datatype": "FP32"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&[0.0])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);

    let response = app.router.clone().oneshot(post("/predict", &applicant())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["probability"], json!(0.5));

    app.gateway.shutdown().await;

    let published = app.publisher.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    let entry = &published[0][0];
    assert_eq!(published[0].len(), 1);
    assert_eq!(entry.prediction_probability, 0.5);
    assert_eq!(entry.model_identifier, "home_credit_default");
    assert_eq!(entry.input_features.get("AMT_CREDIT"), Some(&json!(406597.5)));

    let columns: Vec<&str> = entry.input_features.keys().map(String::as_str).collect();
    assert_eq!(columns, DEFAULT_FEATURE_ORDER.to_vec());
}

#[tokio::test]
async fn test_predict_batch_preserves_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/models/home_credit_default/infer"))
        .and(body_partial_json(json!({"inputs": [{"shape": [3, 10]}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&[-2.0, 0.0, 2.0])))
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);
    let batch = json!([applicant(), applicant(), applicant()]);

    let response = app.router.clone().oneshot(post("/predict/batch", &batch)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let probabilities: Vec<f64> = body["probabilities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_f64().unwrap())
        .collect();
    assert_eq!(probabilities.len(), 3);
    assert!(probabilities[0] < 0.5 && probabilities[2] > 0.5);
    assert_eq!(probabilities[1], 0.5);
    assert!((probabilities[0] + probabilities[2] - 1.0).abs() < 1e-12);

    app.gateway.shutdown().await;
    let published = app.publisher.published.lock().unwrap();
    assert_eq!(published.len(), 1, "one message per call");
    assert_eq!(published[0].len(), 3);
}

#[tokio::test]
async fn test_missing_feature_is_422_without_backend_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&[0.0])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);
    let mut request = applicant();
    request.as_object_mut().unwrap().remove("DAYS_EMPLOYED");

    let response = app.router.clone().oneshot(post("/predict", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("DAYS_EMPLOYED"));
}

#[tokio::test]
async fn test_feature_beyond_fp32_range_is_422() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&[0.0])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);
    let mut request = applicant();
    request["AMT_CREDIT"] = json!(1e39);

    let response = app.router.clone().oneshot(post("/predict", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("AMT_CREDIT"));
}

#[tokio::test]
async fn test_malformed_json_is_422() {
    let mock_server = MockServer::start().await;
    let app = create_app(&mock_server);

    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"]["type"], "validation_error");
}

#[tokio::test]
async fn test_malformed_backend_response_is_502_and_not_audited() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/models/home_credit_default/infer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model_name": "home_credit_default"})))
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);

    let response = app.router.clone().oneshot(post("/predict", &applicant())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"]["type"], "protocol_error");

    app.gateway.shutdown().await;
    assert!(app.publisher.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_backend_error_is_502() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/models/home_credit_default/infer"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "unexpected shape for input 'input'"})))
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);

    let response = app.router.clone().oneshot(post("/predict", &applicant())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "backend_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("unexpected shape"));
}

#[tokio::test]
async fn test_shutting_down_is_503() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/models/home_credit_default/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let app = create_app(&mock_server);

    let ready = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    app.gateway.shutdown().await;

    let response = app.router.clone().oneshot(post("/predict", &applicant())).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["type"], "shutting_down");

    let ready = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_health_and_metrics_routes() {
    let mock_server = MockServer::start().await;
    let app = create_app(&mock_server);

    let health = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let metrics = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}
