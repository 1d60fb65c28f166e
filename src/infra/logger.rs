// src/infra/logger.rs — Structured logging with tracing

use tracing_subscriber::{fmt, EnvFilter};

/// Checked before `RUST_LOG` so the optimizer can be tuned without
/// turning up every dependency's logs.
pub const LOG_ENV: &str = "PROMPTKOI_LOG";

/// Install the global subscriber on stderr. Later calls are no-ops.
pub fn init_logging(default_level: &str) {
    let _ = fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}
