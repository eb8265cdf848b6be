//! Tracing subscriber setup.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use canary_core::config::LoggingConfig;

/// Used when neither `RUST_LOG` nor `logging.filter` is set.
pub const DEFAULT_FILTER: &str = "info,canaryd=debug,canary=debug";

/// `RUST_LOG` first, then the configured directive, then [`DEFAULT_FILTER`].
pub fn env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).with_context(|| format!("invalid log filter {directive:?}"))
}

/// Install the global subscriber. Logs go to stderr unless a file is set.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config)?);

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None if config.json => builder.json().try_init(),
        None => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
