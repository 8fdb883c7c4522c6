//! Tracing subscriber setup for host applications and tests.
//!
//! The library itself only emits `tracing` events; nothing is printed until
//! the host installs a subscriber, either its own or the one built here.

use mnemo_core::{ConfigError, MnemoResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `"mnemo_sync=debug,info"`.
    pub filter: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl LogConfig {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            json: false,
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: std::env::var("MNEMO_LOG").unwrap_or_else(|_| "info".to_string()),
            json: std::env::var("MNEMO_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}

/// Install a global fmt subscriber filtered by `config.filter`.
///
/// Fails if the directive does not parse or a global subscriber is already
/// set.
pub fn init_tracing(config: &LogConfig) -> MnemoResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "MNEMO_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| ConfigError::Subscriber {
        reason: e.to_string(),
    })?;

    tracing::info!(filter = %config.filter, json = config.json, "tracing initialized");
    Ok(())
}
