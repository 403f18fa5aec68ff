//! Range Fetcher: executes a range plan with bounded concurrency, retries,
//! per-read timeouts, an optional deadline and cooperative cancellation.

pub mod error;
pub mod fetcher;
pub mod options;

pub use error::{FetchError, FetchResult};
pub use fetcher::{FetchStats, Fetched, FetchedRange, RangeFetcher};
pub use options::FetchOptions;
pub use tokio_util::sync::CancellationToken;
