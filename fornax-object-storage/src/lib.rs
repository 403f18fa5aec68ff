use std::{fmt::Display, ops::Range, path::PathBuf, sync::Arc};

use bytes::Bytes;
use object_store::{
    ObjectStore,
    aws::{AmazonS3, AmazonS3Builder},
    local::LocalFileSystem,
    path::Path,
};

pub mod error;
pub mod object_ref;
pub mod reader;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{StorageError, StorageResult};
pub use object_ref::{ObjectUrl, RemoteObjectRef};
pub use reader::{ObjectStoreReader, RangeReader};

static DATASETS_OBJECT_STORE: tokio::sync::OnceCell<Arc<FornaxObjectStore>> =
    tokio::sync::OnceCell::const_new();

/// Process-wide dataset store, created from [`fornax_config::CONFIG`] on first use.
pub async fn get_datasets_object_store() -> StorageResult<Arc<FornaxObjectStore>> {
    FornaxObjectStore::datasets().await
}

/// The object store holding the datasets cutouts are taken from.
///
/// Either an S3 bucket or a directory on the local file system, chosen by
/// configuration.
#[derive(Debug, Clone)]
pub struct FornaxObjectStore {
    reader: ObjectStoreReader,
    bucket: Option<String>,
}

impl FornaxObjectStore {
    pub async fn datasets() -> StorageResult<Arc<FornaxObjectStore>> {
        DATASETS_OBJECT_STORE
            .get_or_try_init(|| async {
                Ok::<_, StorageError>(Arc::new(FornaxObjectStore::from_config()?))
            })
            .await
            .cloned()
    }

    fn from_config() -> StorageResult<Self> {
        let config = &*fornax_config::CONFIG;
        if config.s3_data_lake {
            let bucket_name = config.s3_bucket.as_ref().ok_or_else(|| {
                StorageError::InitializationError("S3 bucket name not configured".to_string())
            })?;
            tracing::info!(bucket = %bucket_name, "Using S3 object store for datasets");
            let store = Self::s3_object_store(bucket_name)?;
            Ok(Self::with_store(Arc::new(store), Some(bucket_name.clone())))
        } else {
            tracing::info!(
                data_dir = %fornax_config::DATA_DIR.display(),
                "Using LocalFileSystem object store for datasets"
            );
            let store = Self::local_fs_object_store(fornax_config::DATA_DIR.clone())?;
            Ok(Self::with_store(Arc::new(store), None))
        }
    }

    /// Wrap an existing store. `bucket` is the S3 bucket name, if any, used
    /// to validate `s3://` URLs.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: Option<String>) -> Self {
        Self {
            reader: ObjectStoreReader::new(store),
            bucket,
        }
    }

    fn s3_object_store(bucket_name: &str) -> StorageResult<AmazonS3> {
        AmazonS3Builder::from_env()
            .with_allow_http(true)
            .with_bucket_name(bucket_name)
            .build()
            .map_err(|e| {
                StorageError::InitializationError(format!("Failed to build S3 object store: {e}"))
            })
    }

    fn local_fs_object_store(path: PathBuf) -> StorageResult<LocalFileSystem> {
        std::fs::create_dir_all(&path).map_err(|e| {
            StorageError::InitializationError(format!(
                "Failed to create data directory {}: {e}",
                path.display()
            ))
        })?;
        LocalFileSystem::new_with_prefix(&path).map_err(|e| {
            StorageError::InitializationError(format!(
                "Failed to create LocalFileSystem at {}: {e}",
                path.display()
            ))
        })
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.reader.store()
    }

    /// Turn a bare key or `s3://bucket/key` URL into a location in this store.
    pub fn location_for(&self, url: &str) -> StorageResult<Path> {
        ObjectUrl::location_in(url, self.bucket())
    }
}

impl Display for FornaxObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.bucket {
            Some(bucket) => write!(f, "FornaxObjectStore(s3://{bucket})"),
            None => write!(f, "FornaxObjectStore(local)"),
        }
    }
}

#[async_trait::async_trait]
impl RangeReader for FornaxObjectStore {
    async fn head(&self, location: &Path) -> StorageResult<RemoteObjectRef> {
        self.reader.head(location).await
    }

    async fn read_range(&self, location: &Path, range: Range<u64>) -> StorageResult<Bytes> {
        self.reader.read_range(location, range).await
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    #[test]
    fn location_for_checks_bucket() {
        let store = FornaxObjectStore::with_store(
            Arc::new(InMemory::new()),
            Some("stpubdata".to_string()),
        );
        assert_eq!(
            store
                .location_for("s3://stpubdata/galex/a.fits")
                .unwrap()
                .as_ref(),
            "galex/a.fits"
        );
        assert!(store.location_for("s3://other/galex/a.fits").is_err());
        assert_eq!(store.location_for("galex/a.fits").unwrap().as_ref(), "galex/a.fits");

        let local = FornaxObjectStore::with_store(Arc::new(InMemory::new()), None);
        assert!(local.location_for("s3://stpubdata/galex/a.fits").is_err());
        assert_eq!(local.to_string(), "FornaxObjectStore(local)");
    }
}
