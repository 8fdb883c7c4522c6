//! Configuration types

use crate::{ConfigError, EntryKind, MnemoError, MnemoResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Freshness windows and hot-tier capacities, per entry kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub list_ttl_secs: u64,
    pub detail_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    pub taxonomy_ttl_secs: u64,
    pub list_capacity: usize,
    pub detail_capacity: usize,
    pub stats_capacity: usize,
    pub taxonomy_capacity: usize,
    pub overlay_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            list_ttl_secs: 15 * 60,
            detail_ttl_secs: 24 * 60 * 60,
            stats_ttl_secs: 5 * 60,
            taxonomy_ttl_secs: 7 * 24 * 60 * 60,
            list_capacity: 64,
            detail_capacity: 512,
            stats_capacity: 8,
            taxonomy_capacity: 8,
            overlay_capacity: 4,
        }
    }
}

impl CacheConfig {
    /// TTL applied to every envelope of `kind`. The overlay never expires.
    pub fn ttl(&self, kind: EntryKind) -> Duration {
        match kind {
            EntryKind::List => Duration::from_secs(self.list_ttl_secs),
            EntryKind::Detail => Duration::from_secs(self.detail_ttl_secs),
            EntryKind::Stats => Duration::from_secs(self.stats_ttl_secs),
            EntryKind::Taxonomy => Duration::from_secs(self.taxonomy_ttl_secs),
            EntryKind::LocalOverlay => Duration::MAX,
        }
    }

    /// Maximum hot-tier entries for `kind`.
    pub fn capacity(&self, kind: EntryKind) -> usize {
        match kind {
            EntryKind::List => self.list_capacity,
            EntryKind::Detail => self.detail_capacity,
            EntryKind::Stats => self.stats_capacity,
            EntryKind::Taxonomy => self.taxonomy_capacity,
            EntryKind::LocalOverlay => self.overlay_capacity,
        }
    }

    /// Set the TTL for one kind.
    pub fn with_ttl(mut self, kind: EntryKind, ttl: Duration) -> Self {
        let secs = ttl.as_secs();
        match kind {
            EntryKind::List => self.list_ttl_secs = secs,
            EntryKind::Detail => self.detail_ttl_secs = secs,
            EntryKind::Stats => self.stats_ttl_secs = secs,
            EntryKind::Taxonomy => self.taxonomy_ttl_secs = secs,
            EntryKind::LocalOverlay => {}
        }
        self
    }

    /// Set the hot-tier capacity for one kind.
    pub fn with_capacity(mut self, kind: EntryKind, capacity: usize) -> Self {
        match kind {
            EntryKind::List => self.list_capacity = capacity,
            EntryKind::Detail => self.detail_capacity = capacity,
            EntryKind::Stats => self.stats_capacity = capacity,
            EntryKind::Taxonomy => self.taxonomy_capacity = capacity,
            EntryKind::LocalOverlay => self.overlay_capacity = capacity,
        }
        self
    }
}

/// Disk tier location and sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// LMDB directory. `None` keeps the disk tier in memory.
    pub path: Option<PathBuf>,
    pub map_size_mb: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            map_size_mb: 64,
        }
    }
}

/// Batch fan-out limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum sub-operations awaiting the remote source at once.
    pub max_in_flight: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_in_flight: 4 }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub batch: BatchConfig,
}

impl MnemoConfig {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(source: &str) -> MnemoResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| {
            MnemoError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MNEMO_STORE_PATH`: LMDB directory (default: in-memory)
    /// - `MNEMO_STORE_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `MNEMO_BATCH_MAX_IN_FLIGHT`: Batch concurrency (default: 4)
    /// - `MNEMO_CACHE_LIST_TTL_SECS`: List freshness (default: 900)
    /// - `MNEMO_CACHE_DETAIL_TTL_SECS`: Detail freshness (default: 86400)
    /// - `MNEMO_CACHE_STATS_TTL_SECS`: Statistics freshness (default: 300)
    /// - `MNEMO_CACHE_TAXONOMY_TTL_SECS`: Taxonomy freshness (default: 604800)
    /// - `MNEMO_CACHE_DETAIL_CAPACITY`: Hot detail entries (default: 512)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache: CacheConfig {
                list_ttl_secs: env_or("MNEMO_CACHE_LIST_TTL_SECS", defaults.cache.list_ttl_secs),
                detail_ttl_secs: env_or(
                    "MNEMO_CACHE_DETAIL_TTL_SECS",
                    defaults.cache.detail_ttl_secs,
                ),
                stats_ttl_secs: env_or("MNEMO_CACHE_STATS_TTL_SECS", defaults.cache.stats_ttl_secs),
                taxonomy_ttl_secs: env_or(
                    "MNEMO_CACHE_TAXONOMY_TTL_SECS",
                    defaults.cache.taxonomy_ttl_secs,
                ),
                detail_capacity: env_or(
                    "MNEMO_CACHE_DETAIL_CAPACITY",
                    defaults.cache.detail_capacity,
                ),
                ..defaults.cache
            },
            store: StoreConfig {
                path: std::env::var("MNEMO_STORE_PATH").ok().map(PathBuf::from),
                map_size_mb: env_or("MNEMO_STORE_MAP_SIZE_MB", defaults.store.map_size_mb),
            },
            batch: BatchConfig {
                max_in_flight: env_or("MNEMO_BATCH_MAX_IN_FLIGHT", defaults.batch.max_in_flight),
            },
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(MnemoError::Config) if invalid.
    ///
    /// Validates:
    /// - Every TTL is positive
    /// - Every hot-tier capacity is positive
    /// - map_size_mb > 0
    /// - batch.max_in_flight > 0
    pub fn validate(&self) -> MnemoResult<()> {
        let ttls = [
            ("cache.list_ttl_secs", self.cache.list_ttl_secs),
            ("cache.detail_ttl_secs", self.cache.detail_ttl_secs),
            ("cache.stats_ttl_secs", self.cache.stats_ttl_secs),
            ("cache.taxonomy_ttl_secs", self.cache.taxonomy_ttl_secs),
        ];
        for (field, value) in ttls {
            if value == 0 {
                return Err(invalid(field, value, "ttl must be positive"));
            }
        }

        for kind in EntryKind::ALL {
            let capacity = self.cache.capacity(kind);
            if capacity == 0 {
                return Err(invalid(
                    &format!("cache.{}_capacity", kind),
                    capacity,
                    "capacity must be greater than 0",
                ));
            }
        }

        if self.store.map_size_mb == 0 {
            return Err(invalid(
                "store.map_size_mb",
                self.store.map_size_mb,
                "map_size_mb must be greater than 0",
            ));
        }

        if self.batch.max_in_flight == 0 {
            return Err(invalid(
                "batch.max_in_flight",
                self.batch.max_in_flight,
                "max_in_flight must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> MnemoError {
    MnemoError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
