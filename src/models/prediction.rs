use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single scoring request: named numeric features.
///
/// The body is kept as received. Field order is irrelevant because the codec
/// re-projects every request onto the canonical feature order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionRequest {
    pub features: Map<String, Value>,
}

impl PredictionRequest {
    pub fn new(features: Map<String, Value>) -> Self {
        Self { features }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.features.get(name)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for PredictionRequest {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let features = iter
            .into_iter()
            .map(|(name, value)| (name.into(), Value::from(value)))
            .collect();
        Self { features }
    }
}

/// Response body for `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub probability: f64,
}

/// Response body for `POST /predict/batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictResponse {
    pub probabilities: Vec<f64>,
}
