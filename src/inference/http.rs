use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{InferenceBackend, InferenceError, InferenceResult};
use crate::codec::TensorBatch;
use crate::config::BackendConfig;
use crate::models::inference::{InferErrorBody, InferResponse};

/// KServe v2 (Triton) client over HTTP/JSON.
///
/// Holds a single `reqwest::Client` for the lifetime of the process; its
/// connection pool is shared by every concurrent request.
pub struct HttpInferenceClient {
    client: Client,
    model_name: String,
    infer_url: String,
    ready_url: String,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &BackendConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &BackendConfig) -> Self {
        let model_path = match &config.model_version {
            Some(version) => format!(
                "{}/v2/models/{}/versions/{}",
                config.base_url.trim_end_matches('/'),
                config.model_name,
                version
            ),
            None => format!(
                "{}/v2/models/{}",
                config.base_url.trim_end_matches('/'),
                config.model_name
            ),
        };

        Self {
            client,
            model_name: config.model_name.clone(),
            infer_url: format!("{}/infer", model_path),
            ready_url: format!("{}/ready", model_path),
            timeout: config.timeout(),
        }
    }

    pub fn infer_url(&self) -> &str {
        &self.infer_url
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn infer(&self, batch: &TensorBatch) -> Result<InferenceResult, InferenceError> {
        let response = self
            .client
            .post(&self.infer_url)
            .timeout(self.timeout)
            .json(&batch.to_infer_request())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<InferErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(InferenceError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let parsed: InferResponse = serde_json::from_slice(&body)
            .map_err(|e| InferenceError::Protocol(format!("invalid JSON body: {}", e)))?;

        InferenceResult::try_from(parsed)
    }

    async fn ready(&self) -> Result<(), InferenceError> {
        let response = self
            .client
            .get(&self.ready_url)
            .timeout(self.timeout)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(InferenceError::Backend {
                status: response.status().as_u16(),
                message: format!("model '{}' is not ready", self.model_name),
            })
        }
    }

    async fn close(&self) {
        tracing::info!(model = %self.model_name, "Inference client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FeatureSchema;
    use crate::models::PredictionRequest;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn create_test_config(base_url: &str, timeout_ms: u64) -> BackendConfig {
        BackendConfig {
            base_url: base_url.to_string(),
            model_name: "home_credit_default".to_string(),
            model_version: None,
            input_name: "input".to_string(),
            timeout_ms,
            startup_attempts: 1,
            startup_retry_delay_ms: 10,
        }
    }

    fn two_row_batch() -> TensorBatch {
        let schema = FeatureSchema::new(vec!["a".into(), "b".into()]);
        schema
            .encode(&[
                PredictionRequest::from_iter([("a", 1.0), ("b", 2.0)]),
                PredictionRequest::from_iter([("a", 3.0), ("b", 4.0)]),
            ])
            .unwrap()
    }

    #[tokio::test]
    async fn test_infer_posts_v2_payload_and_parses_scores() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/models/home_credit_default/infer"))
            .and(body_partial_json(json!({
                "inputs": [{"name": "input", "shape": [2, 2], "datatype": "FP32", "data": [1.0, 2.0, 3.0, 4.0]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model_name": "home_credit_default",
                "model_version": "1",
                "outputs": [{"name": "output", "datatype": "FP32", "shape": [2, 1], "data": [-1.5, 0.25]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&create_test_config(&server.uri(), 1_000)).unwrap();
        let result = client.infer(&two_row_batch()).await.unwrap();

        assert_eq!(result.scores, vec![-1.5, 0.25]);
        assert_eq!(result.model_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_versioned_model_url() {
        let mut config = create_test_config("http://triton:8000/", 1_000);
        config.model_version = Some("7".to_string());

        let client = HttpInferenceClient::new(&config).unwrap();
        assert_eq!(
            client.infer_url(),
            "http://triton:8000/v2/models/home_credit_default/versions/7/infer"
        );
    }

    #[tokio::test]
    async fn test_backend_error_carries_diagnostic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "unexpected shape for input 'input'"})),
            )
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&create_test_config(&server.uri(), 1_000)).unwrap();
        let err = client.infer(&two_row_batch()).await.unwrap_err();

        assert_eq!(
            err,
            InferenceError::Backend {
                status: 400,
                message: "unexpected shape for input 'input'".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_outputs_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model_name": "m"})))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&create_test_config(&server.uri(), 1_000)).unwrap();
        let err = client.infer(&two_row_batch()).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn test_non_json_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&create_test_config(&server.uri(), 1_000)).unwrap();
        let err = client.infer(&two_row_batch()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Protocol(msg) if msg.starts_with("invalid JSON body")));
    }

    #[tokio::test]
    async fn test_hang_becomes_transport_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"outputs": [{"data": [0.0, 0.0]}]})),
            )
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&create_test_config(&server.uri(), 50)).unwrap();
        let err = client.infer(&two_row_batch()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Transport { timed_out: true, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client =
            HttpInferenceClient::new(&create_test_config("http://127.0.0.1:1", 500)).unwrap();
        let err = client.infer(&two_row_batch()).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_ready_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/models/home_credit_default/ready"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&create_test_config(&server.uri(), 1_000)).unwrap();
        assert!(client.ready().await.is_ok());

        let missing = HttpInferenceClient::new(&BackendConfig {
            model_name: "other".to_string(),
            ..create_test_config(&server.uri(), 1_000)
        })
        .unwrap();
        assert!(matches!(
            missing.ready().await,
            Err(InferenceError::Backend { status: 404, .. })
        ));
    }
}
