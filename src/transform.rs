//! Logistic transform from raw backend logits to default probabilities.

/// Largest `f64` strictly below 1.0
const MAX_PROBABILITY: f64 = 1.0 - f64::EPSILON / 2.0;

/// Smallest positive normal `f64`
const MIN_PROBABILITY: f64 = f64::MIN_POSITIVE;

/// Numerically stable `1 / (1 + e^-x)`.
///
/// `exp` is only ever evaluated on `-|x|`, so it cannot overflow. Results are
/// kept strictly inside `(0, 1)` even where the exact value rounds to an endpoint.
pub fn sigmoid(x: f64) -> f64 {
    let z = (-x.abs()).exp();
    let p = if x >= 0.0 { 1.0 / (1.0 + z) } else { z / (1.0 + z) };
    p.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
}

/// Apply [`sigmoid`] to every raw score, preserving order
pub fn transform(raw: &[f64]) -> Vec<f64> {
    raw.iter().copied().map(sigmoid).collect()
}
