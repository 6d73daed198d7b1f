use shelf_db::StorageError;
use thiserror::Error;

/// Infrastructure failures surfaced by the library module.
///
/// Expected domain outcomes (not found, duplicates, ...) are never errors;
/// they are variants of the per-operation outcome enums.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("snapshot for user '{user_id}' does not match the library schema: {source}")]
    MalformedSnapshot {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {operation} for user '{user_id}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        user_id: String,
        timeout_ms: u128,
    },
}

pub type Result<T, E = LibraryError> = std::result::Result<T, E>;
