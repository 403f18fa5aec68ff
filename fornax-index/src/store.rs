use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use moka::future::Cache;

use fornax_object_storage::{RangeReader, RemoteObjectRef, StorageError};

use crate::{
    error::{HeaderError, IndexError, IndexResult},
    index::Index,
    source::{HeaderSource, header_source_from_config},
};

static GLOBAL_INDEX_STORE: tokio::sync::OnceCell<Arc<IndexStore>> =
    tokio::sync::OnceCell::const_new();

/// Process-wide index store over the configured dataset object store.
///
/// Created on first use and never torn down.
pub async fn global_index_store() -> Result<Arc<IndexStore>, StorageError> {
    GLOBAL_INDEX_STORE
        .get_or_try_init(|| async {
            let reader = fornax_object_storage::get_datasets_object_store().await?;
            let source = header_source_from_config();
            tracing::info!(source = source.name(), "Creating global index store");
            Ok::<_, StorageError>(Arc::new(IndexStore::new(reader, source)))
        })
        .await
        .cloned()
}

/// Cache of parsed indexes keyed by object identity (location, size, e-tag).
///
/// Entries are never evicted. Concurrent requests for an object that is not
/// cached yet share a single header read.
#[derive(Debug)]
pub struct IndexStore {
    reader: Arc<dyn RangeReader>,
    source: Arc<dyn HeaderSource>,
    cache: Cache<RemoteObjectRef, Arc<Index>>,
    builds: AtomicU64,
}

impl IndexStore {
    pub fn new(reader: Arc<dyn RangeReader>, source: Arc<dyn HeaderSource>) -> Self {
        Self {
            reader,
            source,
            cache: Cache::builder().build(),
            builds: AtomicU64::new(0),
        }
    }

    pub fn reader(&self) -> &Arc<dyn RangeReader> {
        &self.reader
    }

    #[tracing::instrument(level = "debug", skip(self, object), fields(object = %object))]
    pub async fn get_or_build(&self, object: &RemoteObjectRef) -> IndexResult<Arc<Index>> {
        if let Some(index) = self.cache.get(object).await {
            tracing::trace!("index cache hit");
            return Ok(index);
        }

        self.cache
            .try_get_with_by_ref(object, async {
                self.builds.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(source = self.source.name(), "building index");
                let index = self.source.build_index(self.reader.as_ref(), object).await?;
                Ok::<_, HeaderError>(Arc::new(index))
            })
            .await
            .map_err(|source| {
                tracing::warn!(error = %source, "index build failed");
                IndexError::IndexUnavailable {
                    location: object.location().to_string(),
                    source,
                }
            })
    }

    /// Drop the cached index of `object`, if any.
    pub async fn invalidate(&self, object: &RemoteObjectRef) {
        self.cache.invalidate(object).await;
    }

    /// Number of index builds started, successful or not.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn cached(&self, object: &RemoteObjectRef) -> bool {
        self.cache.contains_key(object)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fornax_object_storage::testing::{CountingReader, FailureMode};

    use super::*;
    use crate::{fits::writer::FitsBuilder, source::FitsHeaderSource};

    fn store(reader: &Arc<CountingReader>) -> IndexStore {
        IndexStore::new(reader.clone(), Arc::new(FitsHeaderSource::default()))
    }

    fn image() -> Vec<u8> {
        FitsBuilder::new()
            .image(None, 16, &[8, 8], &[], &[0; 128])
            .finish()
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let reader = Arc::new(CountingReader::new());
        let object = reader.put("a.fits", image()).await;
        let store = store(&reader);

        let first = store.get_or_build(&object).await.unwrap();
        let second = store.get_or_build(&object).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reader.read_count(), 1);
        assert_eq!(store.builds(), 1);
        assert!(store.cached(&object));
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_build() {
        let reader = Arc::new(CountingReader::new());
        let object = reader.put("a.fits", image()).await;
        reader.set_read_delay(Duration::from_millis(50));
        let store = store(&reader);

        let lookups = (0..16).map(|_| store.get_or_build(&object));
        let results = futures::future::join_all(lookups).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(reader.read_count(), 1);
        assert_eq!(store.builds(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lookups_from_spawned_tasks_share_one_build() {
        let reader = Arc::new(CountingReader::new());
        let object = reader.put("a.fits", image()).await;
        reader.set_read_delay(Duration::from_millis(50));
        let store = Arc::new(store(&reader));
        let start = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let (store, object, start) = (store.clone(), object.clone(), start.clone());
                tokio::spawn(async move {
                    start.wait().await;
                    store
                        .get_or_build(&object)
                        .await
                        .map(|index| index.names().count())
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(reader.read_count(), 1);
        assert_eq!(store.builds(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let reader = Arc::new(CountingReader::new());
        let object = reader.put("a.fits", image()).await;
        reader.fail_reads_at(0, FailureMode::Times(1));
        let store = store(&reader);

        let err = store.get_or_build(&object).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexUnavailable { .. }));
        assert!(!store.cached(&object));

        store.get_or_build(&object).await.unwrap();
        assert_eq!(store.builds(), 2);
    }

    #[tokio::test]
    async fn changed_object_gets_a_new_index() {
        let reader = Arc::new(CountingReader::new());
        let old = reader.put("a.fits", image()).await;
        let store = store(&reader);
        store.get_or_build(&old).await.unwrap();

        let bigger = FitsBuilder::new()
            .image(None, 16, &[8, 8], &[], &[0; 128])
            .image(Some("DQ"), 8, &[8, 8], &[], &[0; 64])
            .finish();
        let new = reader.put("a.fits", bigger).await;
        assert_ne!(old, new);

        let index = store.get_or_build(&new).await.unwrap();
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["PRIMARY", "DQ"]);
        assert_eq!(store.builds(), 2);

        store.invalidate(&old).await;
        assert!(!store.cached(&old));
        assert!(store.cached(&new));
    }
}
