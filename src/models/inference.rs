//! KServe v2 inference protocol bodies (as spoken by Triton over HTTP/JSON)

use serde::{Deserialize, Serialize};

/// `POST /v2/models/{model}/infer` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferRequest {
    pub inputs: Vec<InferInput>,
}

/// One named input tensor, data flattened row-major
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferInput {
    pub name: String,
    pub shape: Vec<usize>,
    pub datatype: String,
    pub data: Vec<f32>,
}

/// Inference response body
///
/// Everything is optional at the type level so that a structurally wrong
/// response is reported as a protocol mismatch instead of a JSON error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<InferOutput>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferOutput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub datatype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f64>>,
}

/// Error body returned by the backend on non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct InferErrorBody {
    pub error: String,
}
