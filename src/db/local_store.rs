// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable key-value store backed by a directory of JSON files.
//!
//! Each key is one file. Writes go to a temporary file which is then
//! renamed over the target, so a crash leaves either the old or the new
//! value and never a torn one.

use crate::error::AppError;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
enum Backend {
    Dir(PathBuf),
    Memory(Arc<DashMap<String, String>>),
}

/// Local durable key-value store.
#[derive(Clone)]
pub struct LocalStore {
    backend: Backend,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to create {}: {}", dir.display(), e)))?;

        tracing::info!(path = %dir.display(), "Opened local store");
        Ok(Self {
            backend: Backend::Dir(dir),
        })
    }

    /// Create a volatile in-memory store (tests and simulations).
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(DashMap::new())),
        }
    }

    fn path_for(dir: &Path, key: &str) -> Result<PathBuf, AppError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            || key.starts_with('.')
        {
            return Err(AppError::Storage(format!("Invalid key: {:?}", key)));
        }
        Ok(dir.join(format!("{}.json", key)))
    }

    /// Read and decode the value under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let raw = match &self.backend {
            Backend::Memory(map) => map.get(key).map(|v| v.clone()),
            Backend::Dir(dir) => {
                let path = Self::path_for(dir, key)?;
                match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => Some(contents),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        return Err(AppError::Storage(format!(
                            "Failed to read {}: {}",
                            path.display(),
                            e
                        )))
                    }
                }
            }
        };

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Encode and durably store `value` under `key`, replacing any previous value.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(value)?;
        match &self.backend {
            Backend::Memory(map) => {
                map.insert(key.to_string(), json);
            }
            Backend::Dir(dir) => {
                let path = Self::path_for(dir, key)?;
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, json.as_bytes())
                    .await
                    .map_err(|e| {
                        AppError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
                    })?;
                tokio::fs::rename(&tmp, &path)
                    .await
                    .map_err(|e| {
                        AppError::Storage(format!("Failed to commit {}: {}", path.display(), e))
                    })?;
            }
        }
        tracing::debug!(key, "Stored value");
        Ok(())
    }

    /// Remove `key`. Removing a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        match &self.backend {
            Backend::Memory(map) => {
                map.remove(key);
            }
            Backend::Dir(dir) => {
                let path = Self::path_for(dir, key)?;
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(AppError::Storage(format!(
                            "Failed to delete {}: {}",
                            path.display(),
                            e
                        )))
                    }
                }
            }
        }
        tracing::debug!(key, "Deleted value");
        Ok(())
    }

    /// List keys starting with `prefix`.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let mut keys = match &self.backend {
            Backend::Memory(map) => map
                .iter()
                .filter(|entry| entry.key().starts_with(prefix))
                .map(|entry| entry.key().clone())
                .collect(),
            Backend::Dir(dir) => {
                let mut keys = Vec::new();
                let mut entries = tokio::fs::read_dir(dir)
                    .await
                    .map_err(|e| {
                        AppError::Storage(format!("Failed to list {}: {}", dir.display(), e))
                    })?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| AppError::Storage(e.to_string()))?
                {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if let Some(key) = name.strip_suffix(".json") {
                        if key.starts_with(prefix) {
                            keys.push(key.to_string());
                        }
                    }
                }
                keys
            }
        };
        keys.sort();
        Ok(keys)
    }
}
