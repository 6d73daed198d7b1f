use async_trait::async_trait;
use serde_json::Value;

use crate::StorageError;

/// Durable key-value blob store holding one JSON document per user.
///
/// Writes replace the whole document. There is no version check: the last
/// writer wins.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the document for `user_id`, if one was ever written.
    async fn get(&self, user_id: &str) -> Result<Option<Value>, StorageError>;

    /// Save (or overwrite) the document for `user_id`.
    async fn put(&self, user_id: &str, document: Value) -> Result<(), StorageError>;

    /// Delete the document. Returns true if one existed.
    async fn delete(&self, user_id: &str) -> Result<bool, StorageError>;

    /// Drop any cached copy so the next `get` reaches the backing store.
    async fn evict(&self, _user_id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}
