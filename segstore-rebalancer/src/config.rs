//! Scheduler configuration
//!
//! Loaded from a TOML file, then overridden from `SEGSTORE_*` environment
//! variables and command line flags, and validated before anything runs.
//!
//! ```toml
//! scan_interval_secs = 300
//!
//! [store]
//! root = "/data/store"
//! catalog = "/data/catalog.json"
//!
//! [balancing]
//! min_free_bytes = 10737418240
//! target_min_free_bytes = 10737418240
//! speed_probe = "write-test"
//!
//! [archiving]
//! min_size = 10737418240
//! max_size = 85899345920
//! grouping_keys = "Experiment, SubUnit:merge, All:merge"
//! ```

use crate::probe::{ProbeRegistry, ProbeSettings, ACCEPT_ALL};
use segstore_archiver::{GroupingEngine, Pipeline};
use segstore_core::{SizeWindow, DEFAULT_MIN_FREE_BYTES, GB};
use segstore_storage::DEFAULT_TRANSFER_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two ticks
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub balancing: BalancingSettings,

    #[serde(default)]
    pub archiving: ArchivingSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            store: StoreSettings::default(),
            balancing: BalancingSettings::default(),
            archiving: ArchivingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

/// Where the shares and the catalog live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory holding the numbered share directories
    pub root: PathBuf,
    /// JSON catalog snapshot
    pub catalog: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./store"),
            catalog: PathBuf::from("./catalog.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancingSettings {
    pub enabled: bool,
    /// Free space every share should keep
    pub min_free_bytes: u64,
    /// Free space a target must keep after receiving a data set, at least
    /// `min_free_bytes` so a target is never pushed below the source threshold
    pub target_min_free_bytes: u64,
    /// Name of the speed probe applied to targets
    pub speed_probe: String,
    pub probe: ProbeSettings,
    pub transfer_timeout_secs: u64,
    pub dry_run: bool,
}

impl Default for BalancingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            target_min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            speed_probe: ACCEPT_ALL.to_string(),
            probe: ProbeSettings::default(),
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT_SECS,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivingSettings {
    pub enabled: bool,
    /// Smallest acceptable batch in bytes
    pub min_size: u64,
    /// Largest acceptable batch in bytes
    pub max_size: u64,
    /// Grouping-key pipeline, e.g. `Experiment, SubUnit:merge`
    pub grouping_keys: String,
}

impl Default for ArchivingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 10 * GB,
            max_size: 80 * GB,
            grouping_keys: "Experiment, SubUnit:merge, All:merge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

fn default_scan_interval() -> u64 {
    300
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl SchedulerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `SEGSTORE_*` environment variables
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("SEGSTORE_SCAN_INTERVAL") {
            self.scan_interval_secs = v;
        }
        if let Ok(v) = std::env::var("SEGSTORE_STORE_ROOT") {
            self.store.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SEGSTORE_CATALOG") {
            self.store.catalog = PathBuf::from(v);
        }
        if let Some(v) = env_parse("SEGSTORE_MIN_FREE_BYTES") {
            self.balancing.min_free_bytes = v;
        }
        if let Some(v) = env_parse("SEGSTORE_TARGET_MIN_FREE_BYTES") {
            self.balancing.target_min_free_bytes = v;
        }
        if let Ok(v) = std::env::var("SEGSTORE_SPEED_PROBE") {
            self.balancing.speed_probe = v;
        }
        if let Some(v) = env_parse("SEGSTORE_DRY_RUN") {
            self.balancing.dry_run = v;
        }
        if let Ok(v) = std::env::var("SEGSTORE_GROUPING_KEYS") {
            self.archiving.grouping_keys = v;
        }
        if let Some(v) = env_parse("SEGSTORE_METRICS_PORT") {
            self.metrics.port = v;
        }
        self
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        store_root: Option<PathBuf>,
        catalog: Option<PathBuf>,
        dry_run: bool,
        metrics_port: Option<u16>,
    ) -> Self {
        if let Some(root) = store_root {
            self.store.root = root;
        }
        if let Some(catalog) = catalog {
            self.store.catalog = catalog;
        }
        if dry_run {
            self.balancing.dry_run = true;
        }
        if let Some(port) = metrics_port {
            self.metrics.enabled = true;
            self.metrics.port = port;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scan interval cannot be 0".to_string(),
            ));
        }
        if self.balancing.transfer_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "transfer timeout cannot be 0".to_string(),
            ));
        }

        if self.balancing.target_min_free_bytes < self.balancing.min_free_bytes {
            return Err(ConfigError::ValidationError(format!(
                "target minimum free space {} is below the minimum free space {}",
                self.balancing.target_min_free_bytes, self.balancing.min_free_bytes
            )));
        }

        let registry = ProbeRegistry::standard();
        if !registry.contains(&self.balancing.speed_probe) {
            return Err(ConfigError::ValidationError(format!(
                "unknown speed probe '{}' (valid values are {:?})",
                self.balancing.speed_probe,
                registry.names()
            )));
        }

        if self.archiving.enabled {
            SizeWindow::new(self.archiving.min_size, self.archiving.max_size)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            Pipeline::from_str(&self.archiving.grouping_keys)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.balancing.transfer_timeout_secs)
    }

    /// Grouping engine of the archiving settings
    pub fn grouping_engine(&self) -> Result<GroupingEngine, ConfigError> {
        GroupingEngine::from_config(
            self.archiving.min_size,
            self.archiving.max_size,
            &self.archiving.grouping_keys,
        )
        .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scan_interval(), Duration::from_secs(300));
        assert_eq!(config.balancing.speed_probe, ACCEPT_ALL);
        assert_eq!(config.archiving.max_size, 80 * GB);
    }

    #[test]
    fn test_from_file_partial_tables() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("segstore.toml");
        std::fs::write(
            &path,
            r#"
scan_interval_secs = 60

[store]
root = "/data/store"

[balancing]
min_free_bytes = 1024
speed_probe = "write-test"

[balancing.probe]
sample_bytes = 2048

[archiving]
grouping_keys = "Unit#Experiment, All:merge"
"#,
        )
        .unwrap();

        let config = SchedulerConfig::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.store.root, PathBuf::from("/data/store"));
        assert_eq!(config.store.catalog, PathBuf::from("./catalog.json"));
        assert_eq!(config.balancing.min_free_bytes, 1024);
        assert_eq!(config.balancing.probe.sample_bytes, 2048);
        assert_eq!(
            config.balancing.probe.min_throughput_bytes_per_sec,
            ProbeSettings::default().min_throughput_bytes_per_sec
        );
        assert_eq!(config.grouping_engine().unwrap().pipeline().len(), 2);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            SchedulerConfig::from_toml("scan_interval_secs = \"soon\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_window() {
        let mut config = SchedulerConfig::default();
        config.archiving.min_size = 100;
        config.archiving.max_size = 10;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_rejects_bad_grouping_keys() {
        let mut config = SchedulerConfig::default();
        config.archiving.grouping_keys = "Space, Space:blub".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'merge' is expected"), "{}", err);

        config.archiving.grouping_keys = "hello".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid basic grouping key 'hello'"), "{}", err);
    }

    #[test]
    fn test_rejects_unknown_probe_and_zero_interval() {
        let mut config = SchedulerConfig::default();
        config.balancing.speed_probe = "teleport".to_string();
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.scan_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_target_minimum_below_source_minimum() {
        let mut config = SchedulerConfig::default();
        config.balancing.min_free_bytes = 10 * GB;
        config.balancing.target_min_free_bytes = 5 * GB;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("is below the minimum free space"), "{}", err);

        config.balancing.target_min_free_bytes = 10 * GB;
        config.validate().unwrap();
    }

    #[test]
    fn test_cli_overrides() {
        let config = SchedulerConfig::default().with_overrides(
            Some(PathBuf::from("/mnt/store")),
            None,
            true,
            Some(9100),
        );
        assert_eq!(config.store.root, PathBuf::from("/mnt/store"));
        assert!(config.balancing.dry_run);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }
}
