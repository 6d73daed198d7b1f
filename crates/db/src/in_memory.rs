use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::{SnapshotStore, StorageError};

/// In-memory snapshot store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage). Used as the
/// local stand-in for the durable blob store.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    storage: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a stored document.
    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, user_id: &str) -> Result<Option<Value>, StorageError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| StorageError::LockPoisoned("snapshot read"))?;
        Ok(storage.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, document: Value) -> Result<(), StorageError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StorageError::LockPoisoned("snapshot write"))?;
        storage.insert(user_id.to_string(), document);
        tracing::debug!(target: "shelf-db", user_id, "in-memory snapshot saved");
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StorageError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StorageError::LockPoisoned("snapshot write"))?;
        Ok(storage.remove(user_id).is_some())
    }
}
