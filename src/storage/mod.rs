//! Key→value state persistence
//!
//! Pluggable backend storing schema-versioned JSON documents the adapter
//! never interprets. The filesystem backend is the default; `store` is
//! atomic (write-tmp, fsync, rename) and `delete` on a missing key is a
//! no-op.

pub mod fs;

use async_trait::async_trait;

use crate::events::CorrelationId;

pub use fs::FsStateStore;

/// Error surfaced by state store operations.
#[derive(Debug, thiserror::Error)]
#[error("storage {operation} failed for key {key:?}: {cause}")]
pub struct StorageError {
    pub operation: &'static str,
    pub key: String,
    #[source]
    pub cause: anyhow::Error,
}

impl StorageError {
    #[must_use]
    pub fn new(operation: &'static str, key: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            operation,
            key: key.into(),
            cause: cause.into(),
        }
    }
}

/// Key→value storage of session state and snapshot manifests.
///
/// Keys are `/`-separated paths of safe segments; values are opaque JSON.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a value. Effectively atomic: a reader never observes a
    /// partially written document.
    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        correlation: &CorrelationId,
    ) -> Result<(), StorageError>;

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    /// Remove a value. Missing keys are success.
    async fn delete(&self, key: &str, correlation: &CorrelationId) -> Result<(), StorageError>;

    /// Keys currently stored, optionally filtered by prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError>;
}
