use std::{
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use fornax_object_storage::{RangeReader, RemoteObjectRef, StorageError};
use fornax_planner::RangePlan;

use crate::{
    error::{FetchError, FetchResult},
    options::FetchOptions,
};

/// Bytes read for one planned range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRange {
    pub offset: u64,
    pub length: u64,
    pub bytes: Bytes,
}

impl FetchedRange {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.length
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    /// Planned ranges, one successful read each.
    pub requests: usize,
    /// Read attempts, retries included.
    pub attempts: usize,
    pub bytes_fetched: u64,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Fetched {
    /// One entry per planned range, in no particular order.
    pub ranges: Vec<FetchedRange>,
    pub stats: FetchStats,
}

/// Executes range plans against a [`RangeReader`].
#[derive(Debug, Clone)]
pub struct RangeFetcher {
    reader: Arc<dyn RangeReader>,
    options: FetchOptions,
}

impl RangeFetcher {
    pub fn new(reader: Arc<dyn RangeReader>, options: FetchOptions) -> Self {
        Self { reader, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Read every range of `plan`, at most `max_in_flight` at a time.
    ///
    /// Either every range is returned or none is: the first read that fails
    /// for good, a cancellation of `cancel` or the deadline drops all reads
    /// still in flight.
    #[tracing::instrument(level = "debug", skip_all, fields(object = %object, array = %plan.array, ranges = plan.entries.len()))]
    pub async fn fetch(
        &self,
        object: &RemoteObjectRef,
        plan: &RangePlan,
        cancel: &CancellationToken,
    ) -> FetchResult<Fetched> {
        let started = Instant::now();
        if let Some(entry) = plan
            .entries
            .iter()
            .find(|e| !object.contains(e.offset, e.length))
        {
            return Err(FetchError::RangeOutsideObject {
                location: object.location().to_string(),
                offset: entry.offset,
                length: entry.length,
                object_size: object.size(),
            });
        }

        let attempts = AtomicUsize::new(0);
        let reads = futures::stream::iter(&plan.entries)
            .map(|entry| self.fetch_range(object, entry.offset, entry.length, &attempts))
            .buffer_unordered(self.options.max_in_flight.max(1))
            .try_collect::<Vec<_>>();

        let deadline_timer = async {
            match self.options.deadline {
                Some(deadline) => {
                    tokio::time::sleep(deadline).await;
                    deadline
                }
                None => std::future::pending().await,
            }
        };

        let ranges = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("fetch cancelled");
                return Err(FetchError::Cancelled);
            }
            deadline = deadline_timer => {
                tracing::warn!(?deadline, "fetch deadline exceeded");
                return Err(FetchError::DeadlineExceeded { deadline });
            }
            ranges = reads => ranges?,
        };

        let stats = FetchStats {
            requests: ranges.len(),
            attempts: attempts.load(Ordering::Relaxed),
            bytes_fetched: ranges.iter().map(|r| r.length).sum(),
            elapsed: started.elapsed(),
        };
        tracing::debug!(?stats, "fetched plan");
        Ok(Fetched { ranges, stats })
    }

    async fn fetch_range(
        &self,
        object: &RemoteObjectRef,
        offset: u64,
        length: u64,
        attempts: &AtomicUsize,
    ) -> FetchResult<FetchedRange> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            attempts.fetch_add(1, Ordering::Relaxed);

            match self.read_once(object, offset..offset + length).await {
                Ok(bytes) => {
                    return Ok(FetchedRange {
                        offset,
                        length,
                        bytes,
                    });
                }
                Err(cause) if cause.is_transient() && attempt <= self.options.max_retries => {
                    let delay = self.options.backoff(attempt - 1);
                    tracing::warn!(offset, length, attempt, ?delay, error = %cause, "retrying range read");
                    tokio::time::sleep(delay).await;
                }
                Err(cause) => {
                    tracing::error!(offset, length, attempt, error = %cause, "range read failed");
                    return Err(FetchError::RangeFetchFailed {
                        offset,
                        length,
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }

    async fn read_once(&self, object: &RemoteObjectRef, range: Range<u64>) -> Result<Bytes, StorageError> {
        let expected = range.end - range.start;
        let read = self.reader.read_range(object.location(), range);
        let bytes = tokio::time::timeout(self.options.read_timeout, read)
            .await
            .map_err(|_| StorageError::ReadTimeout {
                location: object.location().to_string(),
                timeout: self.options.read_timeout,
            })??;
        if bytes.len() as u64 != expected {
            return Err(StorageError::ShortRead {
                location: object.location().to_string(),
                expected,
                actual: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }
}
