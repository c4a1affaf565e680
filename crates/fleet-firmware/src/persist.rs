//! File-backed persistence for [`FirmwareCache`]
//!
//! Wraps a shared cache and mirrors it to a JSON snapshot. Reads go straight to
//! the in-memory cache; writes made through this type are saved immediately.
//! Saves are serialized, so concurrent writers never share the temporary file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, FirmwareCache};
use crate::device::DeviceDescriptor;
use crate::model::CheckResult;

/// Durable decorator over a [`FirmwareCache`]
#[derive(Debug, Clone)]
pub struct PersistentCache {
    cache: Arc<FirmwareCache>,
    path: PathBuf,
    save_lock: Arc<Mutex<()>>,
}

impl PersistentCache {
    /// Open the snapshot at `path` into a new cache.
    ///
    /// A missing file starts an empty cache.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::attach(Arc::new(FirmwareCache::new()), path).await
    }

    /// Back an existing cache with the snapshot at `path`, replacing its
    /// contents with the snapshot when one exists.
    pub async fn attach(cache: Arc<FirmwareCache>, path: impl Into<PathBuf>) -> Result<Self> {
        let persistent = Self {
            cache,
            path: path.into(),
            save_lock: Arc::new(Mutex::new(())),
        };
        persistent.load().await?;
        Ok(persistent)
    }

    /// The in-memory cache
    pub fn cache(&self) -> &Arc<FirmwareCache> {
        &self.cache
    }

    /// Snapshot location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the snapshot into the cache
    pub async fn load(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("Failed to stat cache snapshot: {}", self.path.display()))?
        {
            debug!("No cache snapshot at {}", self.path.display());
            return Ok(());
        }

        let data = tokio::fs::read_to_string(&self.path)
            .await
            .context("Failed to read cache snapshot")?;

        let entries: Vec<CacheEntry> =
            serde_json::from_str(&data).context("Failed to parse cache snapshot")?;

        info!(
            entries = entries.len(),
            "Loaded firmware cache from {}",
            self.path.display()
        );
        self.cache.replace_all(entries);
        Ok(())
    }

    /// Write the current cache contents to the snapshot
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create cache directory")?;
        }

        let data = serde_json::to_string_pretty(&self.cache.all_sorted())
            .context("Failed to serialize cache snapshot")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .context("Failed to write cache snapshot")?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context("Failed to replace cache snapshot")?;

        debug!("Saved firmware cache to {}", self.path.display());
        Ok(())
    }

    /// Overwrite an entry and save
    pub async fn set(&self, name: impl Into<String>, entry: CacheEntry) -> Result<()> {
        self.cache.set(name, entry);
        self.save().await
    }

    /// Record a check result and save
    pub async fn record(&self, device: &DeviceDescriptor, result: &CheckResult) -> Result<CacheEntry> {
        let entry = self.cache.record(device, result);
        self.save().await?;
        Ok(entry)
    }

    /// Record many check results with a single save.
    ///
    /// Results whose device is not in `devices` are skipped.
    pub async fn record_all(
        &self,
        devices: &[DeviceDescriptor],
        results: &[CheckResult],
    ) -> Result<usize> {
        let recorded = record_results(&self.cache, devices, results);
        self.save().await?;
        Ok(recorded)
    }

    /// Drop every entry and save
    pub async fn clear(&self) -> Result<()> {
        self.cache.clear();
        self.save().await
    }
}

/// Record each result against its descriptor in `devices`, returning how many
/// were recorded.
pub(crate) fn record_results(
    cache: &FirmwareCache,
    devices: &[DeviceDescriptor],
    results: &[CheckResult],
) -> usize {
    let mut recorded = 0usize;
    for result in results {
        match devices.iter().find(|d| d.name == result.name) {
            Some(device) => {
                cache.record(device, result);
                recorded = recorded.saturating_add(1);
            }
            None => warn!(device = %result.name, "Result for unknown device not cached"),
        }
    }
    recorded
}
