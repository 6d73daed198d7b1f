use thiserror::Error;

/// Failures raised by a snapshot store. Every variant is an infrastructure fault.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot i/o failed for user '{user_id}': {source}")]
    Io {
        user_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot for user '{user_id}' is not valid json: {source}")]
    Serialization {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl StorageError {
    pub(crate) fn io(user_id: &str, source: std::io::Error) -> Self {
        Self::Io {
            user_id: user_id.to_string(),
            source,
        }
    }

    pub(crate) fn serialization(user_id: &str, source: serde_json::Error) -> Self {
        Self::Serialization {
            user_id: user_id.to_string(),
            source,
        }
    }
}
