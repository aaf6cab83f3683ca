use common::cid::Cid;
use common::cid_config::ValidationError;
use common::error::BackendError;
use common::storage::StorageError;
use scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cid {0} already has a config, consider using the override flag")]
    MustOverrideConfig(Cid),

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("replaced cid {0} wasn't found")]
    ReplacedCidNotFound(Cid),

    #[error("can't remove {0}, disable it from hot and cold storage first")]
    ActiveInStorage(Cid),

    #[error("hot storage is disabled for {0}")]
    HotStorageDisabled(Cid),

    #[error("insufficient shards: obtained {obtained}, required {required}")]
    InsufficientShards { obtained: usize, required: usize },

    #[error("{0} is a directory, not a file")]
    NotAFile(Cid),

    #[error("instance is closed")]
    Closed,

    #[error("invalid auth token")]
    InvalidToken,

    #[error("{context}: {source}")]
    Scheduler {
        context: String,
        #[source]
        source: SchedulerError,
    },

    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BackendError,
    },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Wrap a collaborator error with the failing operation, lifting the
/// conditions callers act on into their own variants.
pub trait ErrorContext<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> ErrorContext<T> for std::result::Result<T, SchedulerError> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|err| match err {
            SchedulerError::NotFound(what) => ApiError::NotFound(what),
            SchedulerError::HotStorageDisabled(cid) => ApiError::HotStorageDisabled(cid),
            SchedulerError::Closed => ApiError::Closed,
            SchedulerError::Backend { context, source } => {
                lift_backend(source).unwrap_or_else(|source| ApiError::Backend {
                    context: format!("{}: {context}", f()),
                    source,
                })
            }
            other => ApiError::Scheduler {
                context: f(),
                source: other,
            },
        })
    }
}

impl<T> ErrorContext<T> for std::result::Result<T, BackendError> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|err| {
            lift_backend(err).unwrap_or_else(|source| ApiError::Backend {
                context: f(),
                source,
            })
        })
    }
}

impl<T> ErrorContext<T> for std::result::Result<T, StorageError> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|err| match err {
            StorageError::NotFound(key) => ApiError::NotFound(key),
            source => ApiError::Storage {
                context: f(),
                source,
            },
        })
    }
}

fn lift_backend(err: BackendError) -> std::result::Result<ApiError, BackendError> {
    match err {
        BackendError::InsufficientShards { obtained, required } => {
            Ok(ApiError::InsufficientShards { obtained, required })
        }
        BackendError::NotAFile(cid) => Ok(ApiError::NotAFile(cid)),
        other => Err(other),
    }
}
