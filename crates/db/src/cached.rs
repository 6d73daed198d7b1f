use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::{SnapshotStore, StorageError};

#[derive(Clone)]
struct CacheEntry {
    document: Value,
    expires_at: Instant,
}

/// Read-through, write-through TTL cache in front of another snapshot store.
pub struct CachedSnapshotStore {
    inner: Arc<dyn SnapshotStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CachedSnapshotStore {
    pub fn new(inner: Arc<dyn SnapshotStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, user_id: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned("cache read"))?;
        Ok(entries
            .get(user_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.document.clone()))
    }

    fn remember(&self, user_id: &str, document: Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned("cache write"))?;
        entries.insert(
            user_id.to_string(),
            CacheEntry {
                document,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    fn forget(&self, user_id: &str) -> Result<bool, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned("cache write"))?;
        Ok(entries.remove(user_id).is_some())
    }
}

#[async_trait]
impl SnapshotStore for CachedSnapshotStore {
    async fn get(&self, user_id: &str) -> Result<Option<Value>, StorageError> {
        if let Some(document) = self.cached(user_id)? {
            tracing::debug!(target: "shelf-db", user_id, "snapshot cache hit");
            return Ok(Some(document));
        }

        let loaded = self.inner.get(user_id).await?;
        if let Some(document) = &loaded {
            self.remember(user_id, document.clone())?;
        }
        Ok(loaded)
    }

    async fn put(&self, user_id: &str, document: Value) -> Result<(), StorageError> {
        self.inner.put(user_id, document.clone()).await?;
        self.remember(user_id, document)
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StorageError> {
        self.forget(user_id)?;
        self.inner.delete(user_id).await
    }

    async fn evict(&self, user_id: &str) -> Result<(), StorageError> {
        if self.forget(user_id)? {
            tracing::debug!(target: "shelf-db", user_id, "snapshot cache entry evicted");
        }
        self.inner.evict(user_id).await
    }
}
