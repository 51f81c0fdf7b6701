use chrono::SecondsFormat;
use serde_json::Value;

use crate::models::LogEntry;
use crate::storage::FlatRow;

/// One row per entry, in message order then entry order.
///
/// Columns: the entry's inputs, then `prediction_prob`, `timestamp`, `model_name`.
/// Duplicates are kept.
pub fn flatten<'a, I>(messages: I) -> Vec<FlatRow>
where
    I: IntoIterator<Item = &'a [LogEntry]>,
{
    messages
        .into_iter()
        .flat_map(|entries| entries.iter().map(flatten_entry))
        .collect()
}

fn flatten_entry(entry: &LogEntry) -> FlatRow {
    let mut row = entry.input_features.clone();
    row.insert(
        "prediction_prob".to_string(),
        Value::from(entry.prediction_probability),
    );
    row.insert(
        "timestamp".to_string(),
        Value::String(entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    row.insert(
        "model_name".to_string(),
        Value::String(entry.model_identifier.clone()),
    );
    row
}
