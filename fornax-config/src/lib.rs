//! Process configuration for the fornax subset services.
//!
//! Every setting is read from a `FORNAX_*` environment variable once, on
//! first access of [`CONFIG`]. Components never read [`CONFIG`] directly in
//! their hot paths; they take plain option structs with a `from_config()`
//! constructor so tests can build them without touching the environment.

use std::{path::PathBuf, time::Duration};

use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "FORNAX_LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Read datasets from S3 instead of the local data directory.
    #[envconfig(from = "FORNAX_S3_DATA_LAKE", default = "false")]
    pub s3_data_lake: bool,
    #[envconfig(from = "FORNAX_S3_BUCKET")]
    pub s3_bucket: Option<String>,
    #[envconfig(from = "FORNAX_DATA_DIR", default = "./data/datasets")]
    pub data_dir: String,

    /// Bytes read from the start of an object when looking for in-band headers.
    #[envconfig(from = "FORNAX_HEADER_PREFETCH_BYTES", default = "65536")]
    pub header_prefetch_bytes: u64,
    /// Upper bound on the number of FITS HDUs walked per object.
    #[envconfig(from = "FORNAX_MAX_HDUS", default = "32")]
    pub max_hdus: usize,
    /// Upper bound on the size of a single FITS header.
    #[envconfig(from = "FORNAX_MAX_HEADER_BYTES", default = "1048576")]
    pub max_header_bytes: u64,
    /// Use archive-provided sidecar index files instead of in-band headers.
    #[envconfig(from = "FORNAX_USE_SIDECAR_INDEX", default = "false")]
    pub use_sidecar_index: bool,
    #[envconfig(from = "FORNAX_SIDECAR_SUFFIX", default = ".index.json")]
    pub sidecar_suffix: String,
    #[envconfig(from = "FORNAX_SIDECAR_MAX_BYTES", default = "16777216")]
    pub sidecar_max_bytes: u64,

    /// Neighbouring byte ranges separated by at most this many bytes are
    /// fetched as a single request.
    #[envconfig(from = "FORNAX_RANGE_MIN_GAP_BYTES", default = "32768")]
    pub range_min_gap_bytes: u64,

    #[envconfig(from = "FORNAX_FETCH_MAX_IN_FLIGHT", default = "16")]
    pub fetch_max_in_flight: usize,
    #[envconfig(from = "FORNAX_FETCH_MAX_RETRIES", default = "3")]
    pub fetch_max_retries: usize,
    #[envconfig(from = "FORNAX_FETCH_RETRY_BASE_DELAY_MS", default = "100")]
    pub fetch_retry_base_delay_ms: u64,
    #[envconfig(from = "FORNAX_FETCH_RETRY_MAX_DELAY_MS", default = "2000")]
    pub fetch_retry_max_delay_ms: u64,
    #[envconfig(from = "FORNAX_FETCH_READ_TIMEOUT_MS", default = "30000")]
    pub fetch_read_timeout_ms: u64,
    /// Overall deadline for fetching one plan. Unset means no deadline.
    #[envconfig(from = "FORNAX_FETCH_DEADLINE_MS")]
    pub fetch_deadline_ms: Option<u64>,

    /// Number of cutouts processed concurrently by bulk requests.
    #[envconfig(from = "FORNAX_CUTOUT_CONCURRENCY", default = "4")]
    pub cutout_concurrency: usize,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }

    pub fn fetch_read_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_read_timeout_ms)
    }

    pub fn fetch_deadline(&self) -> Option<Duration> {
        self.fetch_deadline_ms.map(Duration::from_millis)
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
    /// Root of the local file system store used when S3 is disabled.
    pub static ref DATA_DIR: PathBuf = PathBuf::from(&CONFIG.data_dir);
}
