//! Fleet configuration and the shared concurrency ceiling

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::model::StatusPoll;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "fleet.config/1";

/// Global ceiling on simultaneous device operations.
///
/// Cloning shares the same value. Every fan-out reads it at call time, so a
/// change made with [`ConcurrencyLimit::set`] applies to the next operation.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    value: Arc<AtomicUsize>,
}

impl ConcurrencyLimit {
    /// Create a ceiling of `max` simultaneous operations
    pub fn new(max: usize) -> Self {
        Self {
            value: Arc::new(AtomicUsize::new(max)),
        }
    }

    /// Current ceiling, between 1 and [`Semaphore::MAX_PERMITS`]
    pub fn get(&self) -> usize {
        self.value
            .load(Ordering::Acquire)
            .clamp(1, Semaphore::MAX_PERMITS)
    }

    /// Change the ceiling for subsequent operations
    pub fn set(&self, max: usize) {
        self.value.store(max, Ordering::Release);
        debug!(max_concurrency = max, "Updated concurrency ceiling");
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self::new(FleetConfig::DEFAULT_MAX_CONCURRENCY)
    }
}

/// Status polling settings as stored in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPollConfig {
    /// Delay between polls in milliseconds
    pub interval_ms: u64,

    /// Give up after this many seconds
    pub timeout_secs: u64,
}

impl From<StatusPollConfig> for StatusPoll {
    fn from(config: StatusPollConfig) -> Self {
        StatusPoll {
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Fleet firmware configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Configuration schema version
    pub schema_version: String,

    /// Ceiling on simultaneous device operations across the fleet
    pub max_concurrency: usize,

    /// Parallelism used for updates when none is requested; 0 means the ceiling
    pub default_parallelism: usize,

    /// Age after which cached firmware info is considered stale
    pub cache_max_age_secs: u64,

    /// Where the firmware cache is persisted, if anywhere
    pub cache_path: Option<PathBuf>,

    /// Wait for native devices to finish installing
    pub status_poll: Option<StatusPollConfig>,
}

impl FleetConfig {
    /// Default ceiling on simultaneous device operations
    pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

    /// Maximum cache age as a [`Duration`]
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    /// Build the shared concurrency ceiling
    pub fn concurrency_limit(&self) -> ConcurrencyLimit {
        ConcurrencyLimit::new(self.max_concurrency)
    }

    /// Load configuration from `path`; YAML unless the extension is `.json`.
    ///
    /// A missing file yields the defaults.
    pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to stat config file: {}", path.display()))?
        {
            info!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to `path`; YAML unless the extension is `.json`.
    pub async fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        };

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Parse YAML configuration
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid YAML configuration")
    }

    /// Parse JSON configuration
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid JSON configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.schema_version.starts_with("fleet.config/") {
            anyhow::bail!("Invalid schema version: {}", self.schema_version);
        }

        if self.max_concurrency == 0 {
            anyhow::bail!("Invalid max concurrency: must be at least 1");
        }

        if self.max_concurrency > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "Invalid max concurrency: {} exceeds {}",
                self.max_concurrency,
                Semaphore::MAX_PERMITS
            );
        }

        if let Some(poll) = &self.status_poll
            && (poll.interval_ms == 0 || poll.timeout_secs == 0)
        {
            anyhow::bail!(
                "Invalid status poll: interval {}ms, timeout {}s",
                poll.interval_ms,
                poll.timeout_secs
            );
        }

        Ok(())
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            default_parallelism: 0,
            cache_max_age_secs: 3600,
            cache_path: None,
            status_poll: None,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> Result<()> {
        let config = FleetConfig::default();
        config.validate()?;
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.cache_max_age(), Duration::from_secs(3600));
        Ok(())
    }

    #[test]
    fn test_partial_yaml_uses_defaults() -> Result<()> {
        let config = FleetConfig::from_yaml_str("max_concurrency: 12\n")?;
        assert_eq!(config.max_concurrency, 12);
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert!(config.cache_path.is_none());
        Ok(())
    }

    #[test]
    fn test_zero_concurrency_rejected() -> Result<()> {
        let config = FleetConfig::from_yaml_str("max_concurrency: 0\n")?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_zero_poll_interval_rejected() -> Result<()> {
        let config =
            FleetConfig::from_json_str(r#"{"status_poll": {"interval_ms": 0, "timeout_secs": 10}}"#)?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_concurrency_limit_is_shared_and_floored() {
        let limit = ConcurrencyLimit::new(4);
        let shared = limit.clone();
        shared.set(9);
        assert_eq!(limit.get(), 9);

        limit.set(0);
        assert_eq!(shared.get(), 1);

        limit.set(usize::MAX);
        assert_eq!(shared.get(), Semaphore::MAX_PERMITS);
    }

    #[test]
    fn test_oversized_concurrency_rejected() -> Result<()> {
        let config = FleetConfig::from_yaml_str("max_concurrency: 3000000000000000000\n")?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = FleetConfig::load_from_path(dir.path().join("fleet.yaml")).await?;
        assert_eq!(config, FleetConfig::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_load_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("fleet.json");
        let config = FleetConfig {
            max_concurrency: 3,
            status_poll: Some(StatusPollConfig {
                interval_ms: 500,
                timeout_secs: 60,
            }),
            ..Default::default()
        };

        config.save_to_path(&path).await?;
        let loaded = FleetConfig::load_from_path(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }
}
