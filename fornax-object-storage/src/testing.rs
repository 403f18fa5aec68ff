//! Test doubles for [`RangeReader`].
//!
//! [`CountingReader`] wraps an in-memory store, records every call and can be
//! told to fail or stall reads at particular offsets.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use object_store::{ObjectStore, PutPayload, memory::InMemory, path::Path};
use parking_lot::Mutex;

use crate::{ObjectStoreReader, RangeReader, RemoteObjectRef, StorageError, StorageResult};

/// How a read at a given offset misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every attempt fails with a transient error.
    Always,
    /// The first `n` attempts fail with a transient error, later ones succeed.
    Times(usize),
    /// Every attempt fails with a permanent (not found) error.
    Permanent,
    /// The read never completes.
    Hang,
}

#[derive(Debug)]
pub struct CountingReader {
    inner: ObjectStoreReader,
    store: Arc<InMemory>,
    heads: AtomicUsize,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    read_log: Mutex<Vec<Range<u64>>>,
    failures: Mutex<HashMap<u64, (FailureMode, usize)>>,
    read_delay: Mutex<Option<Duration>>,
}

impl Default for CountingReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingReader {
    pub fn new() -> Self {
        let store = Arc::new(InMemory::new());
        Self {
            inner: ObjectStoreReader::new(store.clone()),
            store,
            heads: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            read_log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            read_delay: Mutex::new(None),
        }
    }

    /// Store `bytes` at `location` and return the resolved reference.
    pub async fn put(&self, location: &str, bytes: Vec<u8>) -> RemoteObjectRef {
        let path = Path::from(location);
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .expect("in-memory put");
        self.inner.head(&path).await.expect("in-memory head")
    }

    pub fn fail_reads_at(&self, offset: u64, mode: FailureMode) {
        self.failures.lock().insert(offset, (mode, 0));
    }

    /// Delay every read, to widen windows for concurrency tests.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> Vec<Range<u64>> {
        self.read_log.lock().clone()
    }

    /// Number of attempts made for reads starting at `offset`.
    pub fn attempts_at(&self, offset: u64) -> usize {
        self.read_log
            .lock()
            .iter()
            .filter(|range| range.start == offset)
            .count()
    }

    fn injected_failure(&self, location: &Path, offset: u64) -> Option<FailureMode> {
        let mut failures = self.failures.lock();
        let (mode, seen) = failures.get_mut(&offset)?;
        *seen += 1;
        match *mode {
            FailureMode::Times(n) if *seen > n => None,
            FailureMode::Times(_) => Some(FailureMode::Always),
            other => {
                tracing::trace!(%location, offset, ?other, "injecting read failure");
                Some(other)
            }
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl RangeReader for CountingReader {
    async fn head(&self, location: &Path) -> StorageResult<RemoteObjectRef> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        self.inner.head(location).await
    }

    async fn read_range(&self, location: &Path, range: Range<u64>) -> StorageResult<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.read_log.lock().push(range.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.injected_failure(location, range.start) {
            None => self.inner.read_range(location, range).await,
            Some(FailureMode::Hang) => std::future::pending().await,
            Some(FailureMode::Permanent) => Err(StorageError::from(object_store::Error::NotFound {
                path: location.to_string(),
                source: "injected permanent failure".into(),
            })),
            Some(_) => Err(StorageError::from(object_store::Error::Generic {
                store: "CountingReader",
                source: "injected transient failure".into(),
            })),
        }
    }
}
