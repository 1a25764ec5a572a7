//! Tracing initialization
//!
//! Level comes from `WBPATCH_LOG` (same syntax as `RUST_LOG`), default
//! `warn`. Logs always go to stderr; stdout carries only the envelope.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter
pub(crate) const LOG_ENV: &str = "WBPATCH_LOG";

/// Install the global subscriber
///
/// # Errors
/// Returns an error if the filter is malformed or a subscriber is already set
pub(crate) fn init(json: bool) -> anyhow::Result<()> {
    let filter = create_env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

fn create_env_filter() -> anyhow::Result<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)
            .map_err(|e| anyhow::anyhow!("invalid {LOG_ENV}: {e}")),
        Err(_) => Ok(EnvFilter::new("warn")),
    }
}
