use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read from the environment.
///
/// | Env Var                        | Default          |
/// |--------------------------------|------------------|
/// | `DESKBOOK_DATA_DIR`            | `./data`         |
/// | `DESKBOOK_CATALOG`             | `./catalog.json` |
/// | `DESKBOOK_METRICS_PORT`        | unset (disabled) |
/// | `DESKBOOK_SWEEP_INTERVAL_SECS` | `30`             |
/// | `DESKBOOK_COMPACT_THRESHOLD`   | `1000`           |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            catalog_path: PathBuf::from("./catalog.json"),
            metrics_port: None,
            sweep_interval: Duration::from_secs(30),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("DESKBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            catalog_path: lookup("DESKBOOK_CATALOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            metrics_port: lookup("DESKBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            sweep_interval: lookup("DESKBOOK_SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: lookup("DESKBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
