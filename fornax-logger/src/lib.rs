use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing;
pub use tracing_subscriber::util::TryInitError;

/// Maps the configured log level onto a filter directive.
///
/// Unknown values fall back to `info`.
pub fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => "error",
        "WARN" => "warn",
        "INFO" => "info",
        "DEBUG" => "debug",
        "TRACE" => "trace",
        _ => "info",
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set, otherwise `FORNAX_LOG_LEVEL` is used. Returns an
/// error if a global subscriber was already installed.
pub fn init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(level_directive(&fornax_config::CONFIG.log_level))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}
