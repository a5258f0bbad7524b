use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::holds::ManagerConfig;

/// Process-level settings, read from `TABLECAP_*` environment variables.
/// Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub reaper_interval: Duration,
    pub catalog_ttl: Duration,
    pub manager: ManagerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            reaper_interval: Duration::from_secs(5),
            catalog_ttl: Duration::from_secs(60),
            manager: ManagerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        let manager = ManagerConfig {
            hold_ttl_seconds: defaults
                .manager
                .ttl_seconds(parsed(&lookup, "TABLECAP_HOLD_TTL_SECONDS")),
            strict_conflicts: parsed(&lookup, "TABLECAP_STRICT_CONFLICTS")
                .unwrap_or(defaults.manager.strict_conflicts),
            alternate_limit: parsed(&lookup, "TABLECAP_ALTERNATE_LIMIT")
                .unwrap_or(defaults.manager.alternate_limit),
            next_times_limit: parsed(&lookup, "TABLECAP_NEXT_TIMES_LIMIT")
                .unwrap_or(defaults.manager.next_times_limit),
            max_quote_attempts: defaults.manager.max_quote_attempts,
        };

        Self {
            data_dir: lookup("TABLECAP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "TABLECAP_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "TABLECAP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            reaper_interval: parsed(&lookup, "TABLECAP_REAPER_INTERVAL_SECS")
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            catalog_ttl: parsed(&lookup, "TABLECAP_CATALOG_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.catalog_ttl),
            manager,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tablecap.wal")
    }
}
