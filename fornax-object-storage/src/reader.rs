use std::{fmt::Debug, ops::Range, sync::Arc};

use bytes::Bytes;
use object_store::{ObjectStore, path::Path};

use crate::{
    RemoteObjectRef,
    error::{StorageError, StorageResult},
};

/// Byte-range access to remote objects.
///
/// This is the only way the index, fetch and assembly layers talk to storage,
/// so tests can substitute counting or failing implementations.
#[async_trait::async_trait]
pub trait RangeReader: Debug + Send + Sync {
    /// Resolve the size and e-tag of the object at `location`.
    async fn head(&self, location: &Path) -> StorageResult<RemoteObjectRef>;

    /// Read exactly the bytes in `range` from the object at `location`.
    async fn read_range(&self, location: &Path, range: Range<u64>) -> StorageResult<Bytes>;
}

/// [`RangeReader`] backed by any [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct ObjectStoreReader {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreReader {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }
}

#[async_trait::async_trait]
impl RangeReader for ObjectStoreReader {
    async fn head(&self, location: &Path) -> StorageResult<RemoteObjectRef> {
        let meta = self.inner.head(location).await?;
        Ok(RemoteObjectRef::from(meta))
    }

    async fn read_range(&self, location: &Path, range: Range<u64>) -> StorageResult<Bytes> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let expected = range.end - range.start;
        let bytes = self.inner.get_range(location, range).await?;
        if bytes.len() as u64 != expected {
            return Err(StorageError::ShortRead {
                location: location.to_string(),
                expected,
                actual: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }
}
