use thiserror::Error;

use crate::cid::Cid;
use crate::dag::DagError;
use crate::storage::StorageError;

/// Errors surfaced by storage collaborators (hot tier, cold tier, wallet, miners).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient shards: obtained {obtained}, required {required}")]
    InsufficientShards { obtained: usize, required: usize },

    #[error("{0} is a directory, not a file")]
    NotAFile(Cid),

    #[error("no miners match the selection filter")]
    NoMiners,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Dag(DagError),

    #[error("{0}")]
    Internal(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StorageError> for BackendError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            other => Self::Storage(other),
        }
    }
}

impl From<DagError> for BackendError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::NotAFile(cid) => Self::NotAFile(cid),
            DagError::Storage(inner) => inner.into(),
            other => Self::Dag(other),
        }
    }
}
