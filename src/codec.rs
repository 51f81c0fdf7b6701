//! Tensor codec
//!
//! Projects named feature maps onto the model's canonical feature order and packs
//! them into the positional FP32 tensor the inference backend consumes. The
//! backend has no notion of feature names, so a wrong order silently produces
//! wrong scores; every encode goes through [`FeatureSchema`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::inference::InferenceResult;
use crate::models::inference::{InferInput, InferRequest};
use crate::models::PredictionRequest;

/// Feature order the production model was trained on
pub const DEFAULT_FEATURE_ORDER: [&str; 10] = [
    "AMT_INCOME_TOTAL",
    "AMT_CREDIT",
    "AMT_ANNUITY",
    "DAYS_BIRTH",
    "DAYS_EMPLOYED",
    "bureau_credit_count",
    "bureau_credit_active_count",
    "bureau_credit_days_enddate_mean",
    "bureau_amt_credit_sum",
    "bureau_amt_credit_sum_overdue",
];

/// Name of the model's single input tensor
pub const DEFAULT_INPUT_NAME: &str = "input";

const FP32: &str = "FP32";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("request {row}: missing required feature '{feature}'")]
    MissingFeature { row: usize, feature: String },
    #[error("request {row}: feature '{feature}' must be a finite number")]
    NonNumeric { row: usize, feature: String },
    #[error("request {row}: feature '{feature}' is outside the FP32 range")]
    OutOfRange { row: usize, feature: String },
    #[error("at least one request is required")]
    EmptyBatch,
}

/// Returned by [`decode`] when the backend produced a different number of
/// scores than rows were sent
#[derive(Debug, Clone, PartialEq, Error)]
#[error("expected {expected} scores, backend returned {actual}")]
pub struct ScoreCountMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Canonical, ordered feature list
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    features: Vec<String>,
    input_name: String,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_ORDER.iter().map(|f| f.to_string()).collect())
    }
}

impl FeatureSchema {
    pub fn new(features: Vec<String>) -> Self {
        Self {
            features,
            input_name: DEFAULT_INPUT_NAME.to_string(),
        }
    }

    pub fn with_input_name(mut self, input_name: impl Into<String>) -> Self {
        self.input_name = input_name.into();
        self
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Check that a request carries every canonical feature as a finite number
    pub fn validate(&self, row: usize, request: &PredictionRequest) -> Result<(), SchemaError> {
        for feature in &self.features {
            numeric_feature(row, feature, request)?;
        }
        Ok(())
    }

    /// Build the tensor for one inference call, rows in request order
    pub fn encode(&self, requests: &[PredictionRequest]) -> Result<TensorBatch, SchemaError> {
        if requests.is_empty() {
            return Err(SchemaError::EmptyBatch);
        }

        let mut data = Vec::with_capacity(requests.len() * self.features.len());
        for (row, request) in requests.iter().enumerate() {
            for feature in &self.features {
                data.push(numeric_feature(row, feature, request)? as f32);
            }
        }

        Ok(TensorBatch {
            name: self.input_name.clone(),
            rows: requests.len(),
            cols: self.features.len(),
            data,
        })
    }

    /// The canonical projection of a request as a named map, as recorded in the audit log
    pub fn project(&self, request: &PredictionRequest) -> Map<String, Value> {
        self.features
            .iter()
            .filter_map(|feature| {
                request
                    .get(feature)
                    .map(|value| (feature.clone(), value.clone()))
            })
            .collect()
    }
}

fn numeric_feature(row: usize, feature: &str, request: &PredictionRequest) -> Result<f64, SchemaError> {
    match request.get(feature) {
        None => Err(SchemaError::MissingFeature {
            row,
            feature: feature.to_string(),
        }),
        Some(value) => match value.as_f64().filter(|v| v.is_finite()) {
            None => Err(SchemaError::NonNumeric {
                row,
                feature: feature.to_string(),
            }),
            // The tensor is FP32; anything that overflows it would be sent as null
            Some(v) if !(v as f32).is_finite() => Err(SchemaError::OutOfRange {
                row,
                feature: feature.to_string(),
            }),
            Some(v) => Ok(v),
        },
    }
}

/// Two-dimensional FP32 tensor, `rows x cols`, stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl TensorBatch {
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    /// Wrap the tensor in a KServe v2 infer request body
    pub fn to_infer_request(&self) -> InferRequest {
        InferRequest {
            inputs: vec![InferInput {
                name: self.name.clone(),
                shape: self.shape().to_vec(),
                datatype: FP32.to_string(),
                data: self.data.clone(),
            }],
        }
    }
}

/// Borrow one raw score per input row from an inference result
pub fn decode(result: &InferenceResult, rows: usize) -> Result<&[f64], ScoreCountMismatch> {
    if result.scores.len() != rows {
        return Err(ScoreCountMismatch {
            expected: rows,
            actual: result.scores.len(),
        });
    }
    Ok(&result.scores)
}
