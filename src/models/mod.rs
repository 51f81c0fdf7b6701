pub mod inference;
pub mod log_entry;
pub mod prediction;

pub use log_entry::LogEntry;
pub use prediction::{BatchPredictResponse, PredictResponse, PredictionRequest};
