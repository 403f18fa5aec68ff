use std::time::Duration;

use fornax_object_storage::StorageError;

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to fetch bytes {offset}..+{length} after {attempts} attempt(s): {cause}")]
    RangeFetchFailed {
        offset: u64,
        length: u64,
        attempts: usize,
        #[source]
        cause: StorageError,
    },
    #[error("Planned range {offset}..+{length} lies outside {location} ({object_size} bytes)")]
    RangeOutsideObject {
        location: String,
        offset: u64,
        length: u64,
        object_size: u64,
    },
    #[error("Fetch cancelled")]
    Cancelled,
    #[error("Fetch did not finish within {deadline:?}")]
    DeadlineExceeded { deadline: Duration },
}
