use std::sync::Arc;

use fornax_object_storage::StorageError;

pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Failure surfaced by the index store.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The header region could not be read or parsed. Concurrent callers
    /// waiting on the same build share the underlying error.
    #[error("Index unavailable for {location}: {source}")]
    IndexUnavailable {
        location: String,
        #[source]
        source: Arc<HeaderError>,
    },
}

/// Failure while turning header bytes into an index.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("Failed to read header bytes from {location}: {source}")]
    Read {
        location: String,
        #[source]
        source: StorageError,
    },
    #[error("Malformed FITS header in {location} at byte {offset}: {reason}")]
    Fits {
        location: String,
        offset: u64,
        reason: String,
    },
    #[error("Sidecar index {location} is {size} bytes, above the {limit} byte limit")]
    SidecarTooLarge {
        location: String,
        size: u64,
        limit: u64,
    },
    #[error("Sidecar index {location} describes an object of {expected} bytes, found {actual}")]
    StaleSidecar {
        location: String,
        expected: u64,
        actual: u64,
    },
    #[error("Failed to decode sidecar index {location}: {source}")]
    SidecarDecode {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode sidecar index {location}: {source}")]
    SidecarEncode {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to write sidecar index {location}: {source}")]
    SidecarWrite {
        location: String,
        #[source]
        source: StorageError,
    },
    #[error("No arrays found in {location}")]
    NoArrays { location: String },
    #[error("Invalid layout: {0}")]
    Layout(#[from] LayoutError),
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Array {array}: {reason}")]
    Invalid { array: String, reason: String },
    #[error("Array {array} spans bytes {offset}..{offset}+{length}, beyond the object size {object_size}")]
    ExceedsObject {
        array: String,
        offset: u64,
        length: u64,
        object_size: u64,
    },
}
