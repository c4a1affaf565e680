//! Fleet firmware service
//!
//! Ties the checker, scanner, selector and executor to one shared cache and one
//! shared concurrency ceiling.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::cache::FirmwareCache;
use crate::cancel::CancelToken;
use crate::checker::FirmwareChecker;
use crate::config::{ConcurrencyLimit, FleetConfig};
use crate::connection::ConnectionProvider;
use crate::device::DeviceDescriptor;
use crate::error::FirmwareError;
use crate::executor::UpdateExecutor;
use crate::model::{
    CheckResult, FirmwareInfo, FirmwareStatus, StatusPoll, UpdateEntry, UpdateOpts, UpdateResult,
};
use crate::persist::{PersistentCache, record_results};
use crate::plugin::PluginDispatcher;
use crate::progress::ProgressReporter;
use crate::registry::DeviceRegistry;
use crate::scanner::FleetScanner;
use crate::selector::{UpdateSelector, build_update_list};

/// Entry point for fleet firmware operations
pub struct FirmwareService {
    cache: Arc<FirmwareCache>,
    persistence: Option<PersistentCache>,
    limit: ConcurrencyLimit,
    scanner: FleetScanner,
    selector: UpdateSelector,
    executor: UpdateExecutor,
    max_age: Duration,
    default_parallelism: usize,
    status_poll: Option<StatusPoll>,
}

impl FirmwareService {
    /// Create a service with an in-memory cache
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        plugins: Arc<dyn PluginDispatcher>,
        limit: ConcurrencyLimit,
    ) -> Self {
        let checker = FirmwareChecker::new(connections, plugins);
        let scanner = FleetScanner::new(checker.clone(), limit.clone());
        let defaults = FleetConfig::default();

        Self {
            cache: Arc::new(FirmwareCache::new()),
            persistence: None,
            selector: UpdateSelector::new(scanner.clone()),
            executor: UpdateExecutor::new(checker, limit.clone()),
            scanner,
            limit,
            max_age: defaults.cache_max_age(),
            default_parallelism: defaults.default_parallelism,
            status_poll: None,
        }
    }

    /// Create a service from configuration, opening the persisted cache when
    /// `cache_path` is set.
    pub async fn from_config(
        config: &FleetConfig,
        connections: Arc<dyn ConnectionProvider>,
        plugins: Arc<dyn PluginDispatcher>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let mut service = Self::new(connections, plugins, config.concurrency_limit());
        service.max_age = config.cache_max_age();
        service.default_parallelism = config.default_parallelism;
        service.status_poll = config.status_poll.map(StatusPoll::from);

        if let Some(path) = &config.cache_path {
            service = service.with_persistence(PersistentCache::open(path).await?);
        }

        info!(
            max_concurrency = config.max_concurrency,
            persistent = service.persistence.is_some(),
            "Firmware service ready"
        );
        Ok(service)
    }

    /// Mirror the cache to `persistence`; its cache replaces the current one
    pub fn with_persistence(mut self, persistence: PersistentCache) -> Self {
        self.cache = Arc::clone(persistence.cache());
        self.persistence = Some(persistence);
        self
    }

    /// Report scan and update progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.scanner = self.scanner.with_progress(Arc::clone(&progress));
        self.selector = UpdateSelector::new(self.scanner.clone());
        self.executor = self.executor.with_progress(progress);
        self
    }

    /// Shared firmware cache
    pub fn cache(&self) -> &Arc<FirmwareCache> {
        &self.cache
    }

    /// Shared concurrency ceiling; changes apply to the next operation
    pub fn limit(&self) -> &ConcurrencyLimit {
        &self.limit
    }

    /// Configured maximum cache age
    pub fn cache_max_age(&self) -> Duration {
        self.max_age
    }

    /// Check one device and record the outcome in the cache
    pub async fn check(&self, device: &DeviceDescriptor) -> Result<FirmwareInfo, FirmwareError> {
        let result = CheckResult {
            name: device.name.clone(),
            result: self.scanner.checker().check(device).await,
        };
        self.cache.record(device, &result);
        self.persist().await;
        result.result
    }

    /// Cached info for `device` when present and no older than `max_age`,
    /// otherwise a fresh check.
    pub async fn check_cached(
        &self,
        device: &DeviceDescriptor,
        max_age: Duration,
    ) -> Result<FirmwareInfo, FirmwareError> {
        if let Some(entry) = self.cache.get(&device.name)
            && !FirmwareCache::is_stale(&entry, max_age)
            && let Some(info) = entry.info
        {
            return Ok(info);
        }
        self.check(device).await
    }

    /// Check every device and record every outcome in the cache
    pub async fn prefetch(
        &self,
        cancel: &CancelToken,
        devices: &[DeviceDescriptor],
    ) -> Vec<CheckResult> {
        let results = self.scanner.scan_devices(cancel, devices).await;
        let recorded = record_results(&self.cache, devices, &results);
        self.persist().await;

        info!(recorded, "Prefetched firmware info");
        results
    }

    /// [`FirmwareService::prefetch`] over every registered device
    pub async fn prefetch_all(
        &self,
        cancel: &CancelToken,
        registry: &dyn DeviceRegistry,
    ) -> Vec<CheckResult> {
        let devices: Vec<_> = registry.list_devices().into_values().collect();
        self.prefetch(cancel, &devices).await
    }

    /// Prefetch the registry and list devices with a stable or beta update
    pub async fn update_list(
        &self,
        cancel: &CancelToken,
        registry: &dyn DeviceRegistry,
    ) -> Vec<UpdateEntry> {
        let results = self.prefetch_all(cancel, registry).await;
        build_update_list(&results, registry)
    }

    /// Update `devices` with the service defaults filled into `opts`
    pub async fn update(
        &self,
        cancel: &CancelToken,
        devices: &[DeviceDescriptor],
        opts: &UpdateOpts,
    ) -> Vec<UpdateResult> {
        self.executor
            .update_devices(cancel, devices, &self.resolve_opts(opts))
            .await
    }

    /// Scan `devices`, pick a staged subset of those with a stable update and
    /// update it.
    pub async fn update_available(
        &self,
        cancel: &CancelToken,
        devices: &[DeviceDescriptor],
        staged_percent: u32,
        opts: &UpdateOpts,
    ) -> Vec<UpdateResult> {
        let selected = self
            .selector
            .check_devices_for_updates(cancel, devices, staged_percent)
            .await;
        if selected.is_empty() {
            info!("No devices selected for update");
            return Vec::new();
        }

        self.executor
            .update_entries(cancel, &selected, &self.resolve_opts(opts))
            .await
    }

    /// Live update status of a native device
    pub async fn status(&self, device: &DeviceDescriptor) -> Result<FirmwareStatus, FirmwareError> {
        self.scanner.checker().status(device).await
    }

    /// Restore the previous firmware on a native device
    pub async fn rollback(&self, device: &DeviceDescriptor) -> Result<(), FirmwareError> {
        self.executor.rollback(device).await
    }

    /// Save the cache snapshot, if the cache is persistent
    pub async fn save_cache(&self) -> Result<(), FirmwareError> {
        match &self.persistence {
            Some(persistence) => persistence
                .save()
                .await
                .map_err(|e| FirmwareError::Cache(format!("{e:#}"))),
            None => Ok(()),
        }
    }

    /// Drop every cached entry
    pub async fn clear_cache(&self) -> Result<(), FirmwareError> {
        self.cache.clear();
        self.save_cache().await
    }

    fn resolve_opts(&self, opts: &UpdateOpts) -> UpdateOpts {
        let mut resolved = opts.clone();
        if resolved.parallelism == 0 {
            resolved.parallelism = self.default_parallelism;
        }
        if resolved.poll.is_none() {
            resolved.poll = self.status_poll;
        }
        resolved
    }

    async fn persist(&self) {
        if let Err(e) = self.save_cache().await {
            error!(error = %e, "Failed to persist firmware cache");
        }
    }
}
