use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{SnapshotStore, StorageError};

/// Snapshot store keeping one `<user>.json` document per user in a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written document.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `user_id`.
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(user_id)))
    }
}

/// Map a user id onto a file name that cannot escape the store directory.
fn file_stem(user_id: &str) -> String {
    let mut stem = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' => stem.push(byte as char),
            other => stem.push_str(&format!("_{:02x}", other)),
        }
    }
    if stem.is_empty() || stem.starts_with('.') {
        stem.insert(0, '_');
    }
    stem
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn get(&self, user_id: &str) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(user_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(user_id, err)),
        };

        let document = serde_json::from_slice(&bytes)
            .map_err(|err| StorageError::serialization(user_id, err))?;
        Ok(Some(document))
    }

    async fn put(&self, user_id: &str, document: Value) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| StorageError::io(user_id, err))?;

        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|err| StorageError::serialization(user_id, err))?;

        let path = self.path_for(user_id);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| StorageError::io(user_id, err))?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(user_id, err));
        }

        tracing::debug!(target: "shelf-db", user_id, path = %path.display(), "snapshot file written");
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::io(user_id, err)),
        }
    }
}
