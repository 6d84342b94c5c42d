// Plugin Storage - Namespaced key-value persistence for plugins
//
// Values are JSON. Each plugin sees only its own namespace through
// `PluginStorage`; the backend decides where the data lives.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors raised by storage backends
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Where plugin data is kept
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Value>>;

    async fn set(&self, namespace: &str, key: &str, value: Value) -> StorageResult<()>;

    /// Returns whether the key existed
    async fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// Keys in a namespace, sorted
    async fn keys(&self, namespace: &str) -> StorageResult<Vec<String>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Process-lifetime storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<(String, String), Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> StorageResult<()> {
        self.entries
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .entries
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    async fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == namespace)
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Storage
// ─────────────────────────────────────────────────────────────────────────────

/// A backend view restricted to one namespace
#[derive(Clone)]
pub struct PluginStorage {
    namespace: String,
    backend: Arc<dyn StorageBackend>,
}

impl PluginStorage {
    pub fn new(namespace: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            namespace: namespace.into(),
            backend,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.backend.get(&self.namespace, key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.backend.set(&self.namespace, key, value).await
    }

    pub async fn remove(&self, key: &str) -> StorageResult<bool> {
        self.backend.remove(&self.namespace, key).await
    }

    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.backend.keys(&self.namespace).await
    }

    /// Read and deserialize a value
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value
    pub async fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        self.set(key, serde_json::to_value(value)?).await
    }
}

impl std::fmt::Debug for PluginStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStorage")
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let alpha = PluginStorage::new("alpha", backend.clone());
        let beta = PluginStorage::new("beta", backend.clone());

        assert_ok!(alpha.set("count", json!(1)).await);
        assert_ok!(beta.set("count", json!(2)).await);
        assert_ok!(alpha.set("name", json!("a")).await);

        assert_eq!(alpha.get("count").await.unwrap(), Some(json!(1)));
        assert_eq!(beta.get("count").await.unwrap(), Some(json!(2)));
        assert_eq!(alpha.keys().await.unwrap(), vec!["count", "name"]);

        assert!(alpha.remove("count").await.unwrap());
        assert!(!alpha.remove("count").await.unwrap());
        assert_eq!(alpha.get("count").await.unwrap(), None);
        assert_eq!(beta.get("count").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_typed_access() {
        let storage = PluginStorage::new("p", Arc::new(MemoryStorage::new()));

        storage.set_as("scores", &vec![3u32, 5]).await.unwrap();
        let scores: Option<Vec<u32>> = storage.get_as("scores").await.unwrap();
        assert_eq!(scores, Some(vec![3, 5]));

        assert_ok!(storage.set("bad", json!("text")).await);
        let bad: StorageResult<Option<u32>> = storage.get_as("bad").await;
        let err = assert_err!(bad);
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
