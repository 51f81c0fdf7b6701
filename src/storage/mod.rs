//! Object storage for flushed audit batches
//!
//! Batches are encoded as Parquet and written as one object per flush under a
//! date-partitioned key. Backends implement [`ObjectStore`]; the S3 adapter is used
//! in production, the in-memory one for tests and local dry runs.

pub mod columnar;
pub mod s3;
pub mod writer;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

pub use columnar::encode_parquet;
pub use s3::S3ObjectStore;
pub use writer::{partition_key, PartitionedWriter};

/// One output row: column name to JSON scalar, in column order
pub type FlatRow = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no rows to write")]
    Empty,
    #[error("failed to encode parquet: {0}")]
    Encode(String),
    #[error("failed to upload '{key}': {message}")]
    Upload { key: String, message: String },
}

impl From<arrow::error::ArrowError> for StorageError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for StorageError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::Encode(err.to_string())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Store `body` under `key` in a single request
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock().get(key).cloned()
    }

    /// Stored keys in lexical order
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), body);
        Ok(())
    }
}

/// Build the configured store
pub async fn build_store(config: &StorageConfig) -> Arc<dyn ObjectStore> {
    match config.backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::from_config(config).await),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory object storage; flushed files are not persisted");
            Arc::new(MemoryObjectStore::new())
        }
    }
}
