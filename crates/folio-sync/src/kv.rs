//! Durable key-value collaborator
//!
//! Used for access history, open tabs and local drafts. No transactional
//! guarantees are assumed: every write replaces one whole key.

use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Durable JSON key-value store
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read a key
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Write a key
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove a key
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory [`KvStore`]
///
/// Survives as long as the value does, so tests can drop and rebuild the
/// engine against the same instance to model a reload.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Value>,
}

impl MemoryKvStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, for assertions
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// Number of stored keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Decode a stored JSON value, reporting the key on failure
pub(crate) fn decode<T: serde::de::DeserializeOwned>(key: &str, value: Value) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.get("a").await.unwrap(), None);
        kv.set("a", json!({"x": 1})).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(json!({"x": 1})));
        kv.remove("a").await.unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn decode_reports_key() {
        let err = decode::<Vec<u32>>("tabs", json!("nope")).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { key, .. } if key == "tabs"));
    }
}
