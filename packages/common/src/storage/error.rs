use std::fmt;

/// Errors that can occur during block and record storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// The requested block or record was not found.
    NotFound(String),
    /// An I/O error occurred.
    Io(std::io::Error),
    /// Stored bytes did not hash to the identifier they were filed under.
    Corrupted(String),
    /// The block exceeds the configured size limit.
    SizeLimitExceeded { actual: u64, limit: u64 },
    /// A record could not be encoded or decoded.
    Serialization(serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "not found: {key}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::Corrupted(msg) => write!(f, "corrupted block: {msg}"),
            Self::SizeLimitExceeded { actual, limit } => {
                write!(f, "block exceeds size limit ({actual} > {limit} bytes)")
            }
            Self::Serialization(err) => write!(f, "record serialization error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}
