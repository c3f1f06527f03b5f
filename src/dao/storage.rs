use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result alias for store operations that also check domain preconditions.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the statement.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted row could not be mapped back into the domain.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// An event payload could not be serialized or parsed.
    #[error("failed to encode event payload")]
    Encoding(#[from] serde_json::Error),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Outcome of a transactional store operation that did not commit.
///
/// Precondition and not-found failures abort the transaction before anything is written.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The game is not in a state that allows the operation.
    #[error("{0}")]
    Precondition(String),
    /// A referenced game, player, round or membership does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StoreError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        StoreError::Precondition(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        StoreError::NotFound(message.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(StorageError::Encoding(err))
    }
}
