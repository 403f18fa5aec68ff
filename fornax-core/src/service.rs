use std::sync::Arc;

use futures::StreamExt;
use object_store::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use fornax_fetcher::{FetchOptions, RangeFetcher};
use fornax_index::{HeaderSource, IndexStore, global_index_store};
use fornax_object_storage::{ObjectUrl, RangeReader, RemoteObjectRef, get_datasets_object_store};
use fornax_planner::{PlannerOptions, SubsetRequest};

use crate::{
    assembler::assemble,
    error::{SubsetError, SubsetResult},
    subset::Subset,
};

/// Runs cutouts end to end: index lookup, planning, fetching and assembly.
#[derive(Debug, Clone)]
pub struct SubsetService {
    index_store: Arc<IndexStore>,
    fetcher: RangeFetcher,
    planner: PlannerOptions,
    bucket: Option<String>,
    cutout_concurrency: usize,
}

impl SubsetService {
    pub fn new(
        index_store: Arc<IndexStore>,
        fetcher: RangeFetcher,
        planner: PlannerOptions,
        cutout_concurrency: usize,
    ) -> Self {
        Self {
            index_store,
            fetcher,
            planner,
            bucket: None,
            cutout_concurrency: cutout_concurrency.max(1),
        }
    }

    /// Service over one reader with its own index store.
    pub fn with_reader(
        reader: Arc<dyn RangeReader>,
        source: Arc<dyn HeaderSource>,
        fetch: FetchOptions,
        planner: PlannerOptions,
    ) -> Self {
        let index_store = Arc::new(IndexStore::new(reader.clone(), source));
        Self::new(index_store, RangeFetcher::new(reader, fetch), planner, 4)
    }

    /// Service over the configured dataset store, sharing the process-wide
    /// index store.
    pub async fn from_config() -> SubsetResult<Self> {
        let datasets = get_datasets_object_store().await?;
        let index_store = global_index_store().await?;
        let fetcher = RangeFetcher::new(datasets.clone(), FetchOptions::from_config());
        let mut service = Self::new(
            index_store,
            fetcher,
            PlannerOptions::from_config(),
            fornax_config::CONFIG.cutout_concurrency,
        );
        service.bucket = datasets.bucket().map(str::to_string);
        Ok(service)
    }

    pub fn with_cutout_concurrency(mut self, cutout_concurrency: usize) -> Self {
        self.cutout_concurrency = cutout_concurrency.max(1);
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn index_store(&self) -> &Arc<IndexStore> {
        &self.index_store
    }

    /// Look up the size and e-tag of the object at `location`.
    pub async fn resolve(&self, location: &Path) -> SubsetResult<RemoteObjectRef> {
        Ok(self.index_store.reader().head(location).await?)
    }

    /// Like [`resolve`](Self::resolve) for a bare key or `s3://bucket/key`.
    pub async fn resolve_url(&self, url: &str) -> SubsetResult<RemoteObjectRef> {
        let location = ObjectUrl::location_in(url, self.bucket.as_deref())?;
        self.resolve(&location).await
    }

    pub async fn subset(
        &self,
        object: &RemoteObjectRef,
        request: &SubsetRequest,
    ) -> SubsetResult<Subset> {
        self.subset_with_cancel(object, request, &CancellationToken::new())
            .await
    }

    /// Cut `request` out of `object`. Cancelling `cancel` abandons the reads
    /// in flight and fails the request.
    pub async fn subset_with_cancel(
        &self,
        object: &RemoteObjectRef,
        request: &SubsetRequest,
        cancel: &CancellationToken,
    ) -> SubsetResult<Subset> {
        let span = tracing::info_span!("subset", object = %object, array = %request.array);
        async {
            let index = self.index_store.get_or_build(object).await?;
            let plan = fornax_planner::plan(&index, request, &self.planner)?;
            let fetched = self.fetcher.fetch(object, &plan, cancel).await?;
            let mut subset = assemble(&index, &plan, fetched.ranges)?;

            subset.provenance.object = Some(object.clone());
            subset.provenance.fetch = Some(fetched.stats);
            tracing::info!(
                shape = ?subset.shape,
                ranges = plan.entries.len(),
                bytes_fetched = fetched.stats.bytes_fetched,
                overfetch_bytes = plan.overfetch_bytes(),
                elapsed_ms = fetched.stats.elapsed.as_millis() as u64,
                "subset complete"
            );
            Ok::<_, SubsetError>(subset)
        }
        .instrument(span)
        .await
        .inspect_err(|err| {
            tracing::warn!(object = %object, stage = %err.stage(), kind = ?err.kind(), error = %err, "subset failed");
        })
    }

    /// Run many cutouts, at most `cutout_concurrency` at a time. Results come
    /// back in the order of `requests`; one failing cutout does not affect
    /// the others.
    pub async fn cutouts(
        &self,
        requests: &[(RemoteObjectRef, SubsetRequest)],
        cancel: &CancellationToken,
    ) -> Vec<SubsetResult<Subset>> {
        tracing::debug!(count = requests.len(), concurrency = self.cutout_concurrency, "running cutouts");
        futures::stream::iter(requests)
            .map(|(object, request)| self.subset_with_cancel(object, request, cancel))
            .buffered(self.cutout_concurrency)
            .collect()
            .await
    }
}
