use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::{columnar, FlatRow, ObjectStore, StorageError};

/// Object key for a file written at `now`:
/// `year=YYYY/month=MM/day=DD/HHMMSS_<suffix>.parquet`
pub fn partition_key(now: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "year={}/month={:02}/day={:02}/{}_{}.parquet",
        now.year(),
        now.month(),
        now.day(),
        now.format("%H%M%S"),
        suffix
    )
}

/// Eight hex characters; keeps same-second writes from colliding
fn unique_suffix() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Writes each flush as one date-partitioned Parquet object
pub struct PartitionedWriter {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl PartitionedWriter {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { store, prefix }
    }

    /// Encode and upload `rows`; returns the key written
    pub async fn write(&self, rows: &[FlatRow]) -> Result<String, StorageError> {
        let body = columnar::encode_parquet(rows)?;
        let key = self.key_for(Utc::now());
        let size = body.len();

        self.store.put(&key, body).await?;

        tracing::info!(key = %key, rows = rows.len(), bytes = size, "Wrote parquet file");
        Ok(key)
    }

    fn key_for(&self, now: DateTime<Utc>) -> String {
        let key = partition_key(now, &unique_suffix());
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key,
        }
    }
}
