use std::time::Duration;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
    #[error("Read of {location} timed out after {timeout:?}")]
    ReadTimeout { location: String, timeout: Duration },
    #[error("Short read from {location}: expected {expected} bytes, received {actual}")]
    ShortRead {
        location: String,
        expected: u64,
        actual: u64,
    },
    #[error("Invalid object url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl StorageError {
    /// Whether repeating the same read may succeed.
    ///
    /// Missing objects, bad paths and permission failures are permanent. The
    /// object store reports exhausted HTTP retries, connection resets and 5xx
    /// responses as generic errors, which are treated as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::ReadTimeout { .. } | StorageError::ShortRead { .. } => true,
            StorageError::ObjectStoreError(object_store::Error::Generic { .. }) => true,
            _ => false,
        }
    }
}
