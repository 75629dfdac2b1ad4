//! Filesystem state store backend
//!
//! One JSON file per key under a root directory. Writes go through a
//! temporary sibling, fsync, then rename, so concurrent readers observe
//! either the old or the new document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::events::{CorrelationId, Event, EventBus, EventType, Severity};

use super::{StateStore, StorageError};

/// Filesystem-backed [`StateStore`].
pub struct FsStateStore {
    root: PathBuf,
    events: EventBus,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            root: root.into(),
            events,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto its file path, rejecting traversal and odd segments.
    fn key_path(&self, operation: &'static str, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::new(
                operation,
                key,
                anyhow::anyhow!("empty key"),
            ));
        }
        let mut path = self.root.clone();
        let segments: Vec<&str> = key.split('/').collect();
        for (index, segment) in segments.iter().enumerate() {
            let valid = !segment.is_empty()
                && *segment != "."
                && *segment != ".."
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
            if !valid {
                return Err(StorageError::new(
                    operation,
                    key,
                    anyhow::anyhow!("invalid key segment {segment:?}"),
                ));
            }
            if index == segments.len() - 1 {
                // Append rather than set_extension so dots inside the key
                // segment survive the round trip.
                path.push(format!("{segment}.json"));
            } else {
                path.push(segment);
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        correlation: &CorrelationId,
    ) -> Result<(), StorageError> {
        let path = self.key_path("store", key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::new("store", key, anyhow::anyhow!("key has no parent directory")))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::new("store", key, e))?;

        let bytes = serde_json::to_vec_pretty(&value)
            .map_err(|e| StorageError::new("store", key, e))?;

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StorageError::new("store", key, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| StorageError::new("store", key, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::new("store", key, e))?;
        drop(file);
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::new("store", key, e))?;

        log::debug!("stored state key {key} ({} bytes)", bytes.len());
        self.events.publish(Event::new(
            EventType::StorageStore,
            correlation.clone(),
            Severity::Debug,
            json!({ "key": key, "bytes": bytes.len() }),
        ));
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let path = self.key_path("load", key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::new("load", key, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::new("load", key, e))
    }

    async fn delete(&self, key: &str, correlation: &CorrelationId) -> Result<(), StorageError> {
        let path = self.key_path("delete", key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.events.publish(Event::new(
                    EventType::StorageDelete,
                    correlation.clone(),
                    Severity::Debug,
                    json!({ "key": key }),
                ));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::new("delete", key, e)),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::new("list", prefix.unwrap_or(""), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::new("list", prefix.unwrap_or(""), e))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .with_extension("")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if prefix.is_none_or(|p| key.starts_with(p)) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
