//! Identity of a remote object and parsing of object URLs.

use std::fmt::Display;

use object_store::{ObjectMeta, path::Path};

use crate::error::{StorageError, StorageResult};

/// A resolved remote object: where it lives and how large it is.
///
/// Once resolved the reference is immutable. Two references to the same
/// location with a different size or e-tag describe different content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObjectRef {
    location: Path,
    size: u64,
    e_tag: Option<String>,
}

impl RemoteObjectRef {
    pub fn new(location: Path, size: u64, e_tag: Option<String>) -> Self {
        Self {
            location,
            size,
            e_tag,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn e_tag(&self) -> Option<&str> {
        self.e_tag.as_deref()
    }

    /// Whether `offset..offset + length` lies entirely inside the object.
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_add(length)
            .is_some_and(|end| end <= self.size)
    }
}

impl From<ObjectMeta> for RemoteObjectRef {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            location: meta.location,
            size: meta.size,
            e_tag: meta.e_tag,
        }
    }
}

impl Display for RemoteObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.location, self.size)
    }
}

/// An object address given either as a bare key or as a `s3://bucket/key` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUrl {
    pub bucket: Option<String>,
    pub location: Path,
}

impl ObjectUrl {
    pub fn parse(input: &str) -> StorageResult<Self> {
        let invalid = |reason: &str| StorageError::InvalidUrl {
            url: input.to_string(),
            reason: reason.to_string(),
        };

        if !input.contains("://") {
            let key = input.trim_start_matches('/');
            if key.is_empty() {
                return Err(invalid("empty object key"));
            }
            let location = Path::parse(key).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self {
                bucket: None,
                location,
            });
        }

        let url = url::Url::parse(input).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "s3" {
            return Err(invalid("unsupported scheme, expected s3://"));
        }
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing bucket"))?
            .to_string();
        let location =
            Path::from_url_path(url.path()).map_err(|e| invalid(&e.to_string()))?;
        if location.as_ref().is_empty() {
            return Err(invalid("empty object key"));
        }

        Ok(Self {
            bucket: Some(bucket),
            location,
        })
    }

    /// Parse `input` and resolve it against a store serving `bucket`
    /// (`None` for stores that are not S3 buckets).
    ///
    /// URLs naming a different bucket than the store's are rejected.
    pub fn location_in(input: &str, bucket: Option<&str>) -> StorageResult<Path> {
        let parsed = Self::parse(input)?;
        match (parsed.bucket.as_deref(), bucket) {
            (Some(requested), Some(configured)) if requested != configured => {
                Err(StorageError::InvalidUrl {
                    url: input.to_string(),
                    reason: format!("bucket {requested} is not the configured bucket {configured}"),
                })
            }
            (Some(_), None) => Err(StorageError::InvalidUrl {
                url: input.to_string(),
                reason: "s3 url given but the dataset store is not backed by S3".to_string(),
            }),
            _ => Ok(parsed.location),
        }
    }
}
