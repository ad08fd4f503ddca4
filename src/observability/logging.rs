//! Logging setup.

use tracing::Level;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_TARGET: &str = "toolgate";

#[inline]
const fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the computed filter.
pub fn init_logging(level: Level) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{}={}", DEFAULT_LOG_TARGET, level_to_str(level)))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
