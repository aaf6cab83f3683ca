use common::cid::Cid;
use common::error::BackendError;
use common::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is not available in hot storage")]
    HotStorageDisabled(Cid),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("scheduler is closed")]
    Closed,

    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BackendError,
    },

    #[error("scheduler state: {0}")]
    Storage(StorageError),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Backend { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<StorageError> for SchedulerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            other => Self::Storage(other),
        }
    }
}

/// Attach the failing operation to a collaborator error.
pub trait BackendContext<T> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<BackendError>> BackendContext<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SchedulerError::Backend {
            context: f(),
            source: e.into(),
        })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
