// Persistent plugin storage backed by a redb database file
//
// All namespaces share one table. Keys are `<namespace>\0<key>` so that a
// namespace maps to one contiguous key range.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use stagehand_runtime::plugin::{StorageBackend, StorageError, StorageResult};

const PLUGIN_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("plugin_storage");

fn backend_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn full_key(namespace: &str, key: &str) -> String {
    format!("{}\0{}", namespace, key)
}

/// redb-backed [`StorageBackend`]
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(backend_error)?;
        }

        let db = Database::create(path)
            .map_err(|e| StorageError::Backend(format!("Failed to open {}: {}", path.display(), e)))?;

        // Ensure the table exists so readers never see a missing table
        let write_txn = db.begin_write().map_err(backend_error)?;
        write_txn.open_table(PLUGIN_TABLE).map_err(backend_error)?;
        write_txn.commit().map_err(backend_error)?;

        tracing::info!("Plugin storage opened: {}", path.display());
        Ok(Self { db: Arc::new(db) })
    }

    /// Run a blocking database operation off the async workers
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(backend_error)?
    }
}

#[async_trait]
impl StorageBackend for RedbStorage {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Value>> {
        let key = full_key(namespace, key);
        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(backend_error)?;
            let table = read_txn.open_table(PLUGIN_TABLE).map_err(backend_error)?;
            let stored = table.get(key.as_str()).map_err(backend_error)?;
            let value = match stored {
                Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
                None => None,
            };
            Ok(value)
        })
        .await
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> StorageResult<()> {
        let key = full_key(namespace, key);
        let bytes = serde_json::to_vec(&value)?;
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(backend_error)?;
            {
                let mut table = write_txn.open_table(PLUGIN_TABLE).map_err(backend_error)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(backend_error)?;
            }
            write_txn.commit().map_err(backend_error)
        })
        .await
    }

    async fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let key = full_key(namespace, key);
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(backend_error)?;
            let existed = {
                let mut table = write_txn.open_table(PLUGIN_TABLE).map_err(backend_error)?;
                let removed = table.remove(key.as_str()).map_err(backend_error)?;
                removed.is_some()
            };
            write_txn.commit().map_err(backend_error)?;
            Ok(existed)
        })
        .await
    }

    async fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let start = format!("{}\0", namespace);
        let end = format!("{}\u{1}", namespace);
        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(backend_error)?;
            let table = read_txn.open_table(PLUGIN_TABLE).map_err(backend_error)?;
            let mut keys = Vec::new();
            for entry in table
                .range(start.as_str()..end.as_str())
                .map_err(backend_error)?
            {
                let (key, _) = entry.map_err(backend_error)?;
                if let Some(name) = key.value().strip_prefix(start.as_str()) {
                    keys.push(name.to_string());
                }
            }
            Ok(keys)
        })
        .await
    }
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}
