//! Typed access to the per-user snapshot.
//!
//! Every domain operation is one read-modify-write of the whole document
//! through [`LibraryStore::update`]. There is no version token: two turns for
//! the same user that overlap will race and the later write wins. Adding
//! compare-and-swap belongs here, not in the domain code.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shelf_db::{SnapshotStore, StorageError};
use time::OffsetDateTime;

use super::error::{LibraryError, Result};
use super::models::{UserLibraryState, DEFAULT_LOAN_DAYS};

/// What an update closure wants done with the snapshot it was handed.
#[derive(Debug)]
pub enum Change<T> {
    /// Write the modified snapshot back, then return the value.
    Commit(T),
    /// Leave the stored snapshot untouched.
    Discard(T),
}

#[derive(Clone)]
pub struct LibraryStore {
    backend: Arc<dyn SnapshotStore>,
    io_timeout: Duration,
    loan_days: i64,
}

impl LibraryStore {
    pub fn new(backend: Arc<dyn SnapshotStore>, io_timeout: Duration) -> Self {
        Self {
            backend,
            io_timeout,
            loan_days: DEFAULT_LOAN_DAYS,
        }
    }

    /// Loan length used to rebuild due dates missing from legacy snapshots.
    pub fn with_loan_days(mut self, loan_days: i64) -> Self {
        self.loan_days = loan_days;
        self
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        user_id: &str,
        io: impl Future<Output = std::result::Result<T, StorageError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.io_timeout, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LibraryError::Timeout {
                operation,
                user_id: user_id.to_string(),
                timeout_ms: self.io_timeout.as_millis(),
            }),
        }
    }

    /// Decode the stored snapshot without creating one.
    pub async fn peek(&self, user_id: &str) -> Result<Option<UserLibraryState>> {
        let Some(document) = self
            .bounded("read", user_id, self.backend.get(user_id))
            .await?
        else {
            return Ok(None);
        };

        let mut state: UserLibraryState = serde_json::from_value(document).map_err(|source| {
            LibraryError::MalformedSnapshot {
                user_id: user_id.to_string(),
                source,
            }
        })?;

        let fixes = state.migrate(OffsetDateTime::now_utc(), self.loan_days);
        if fixes > 0 {
            tracing::warn!(user_id, fixes, "legacy snapshot records repaired on load");
        }
        Ok(Some(state))
    }

    /// Load the snapshot, creating and persisting an empty one for a new user.
    pub async fn load(&self, user_id: &str) -> Result<UserLibraryState> {
        if let Some(state) = self.peek(user_id).await? {
            return Ok(state);
        }

        tracing::info!(user_id, "creating empty library snapshot");
        let state = UserLibraryState::default();
        self.save(user_id, &state).await?;
        Ok(state)
    }

    /// Overwrite the stored snapshot.
    pub async fn save(&self, user_id: &str, state: &UserLibraryState) -> Result<()> {
        let document = serde_json::to_value(state).map_err(|source| {
            LibraryError::MalformedSnapshot {
                user_id: user_id.to_string(),
                source,
            }
        })?;
        self.bounded("write", user_id, self.backend.put(user_id, document))
            .await
    }

    /// Read the snapshot, let `apply` mutate it, and write it back on `Change::Commit`.
    pub async fn update<T, F>(&self, user_id: &str, apply: F) -> Result<T>
    where
        F: FnOnce(&mut UserLibraryState) -> Change<T>,
    {
        let mut state = self.load(user_id).await?;
        match apply(&mut state) {
            Change::Commit(value) => {
                self.save(user_id, &state).await?;
                Ok(value)
            }
            Change::Discard(value) => Ok(value),
        }
    }

    /// Read-only view of the snapshot.
    pub async fn read<T, F>(&self, user_id: &str, view: F) -> Result<T>
    where
        F: FnOnce(&UserLibraryState) -> T,
    {
        let state = self.load(user_id).await?;
        Ok(view(&state))
    }

    /// Drop any cached copy so the next read reaches the durable store.
    pub async fn evict(&self, user_id: &str) -> Result<()> {
        self.bounded("evict", user_id, self.backend.evict(user_id))
            .await
    }
}
