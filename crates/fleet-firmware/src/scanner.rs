//! Bounded fan-out of firmware checks across the fleet

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::checker::FirmwareChecker;
use crate::config::ConcurrencyLimit;
use crate::device::DeviceDescriptor;
use crate::error::FirmwareError;
use crate::model::CheckResult;
use crate::progress::{NoopProgress, ProgressReporter};

/// Checks many devices concurrently, at most [`ConcurrencyLimit`] at a time.
///
/// Every device is attempted regardless of how its siblings fare. Results come
/// back in completion order, not input order.
#[derive(Clone)]
pub struct FleetScanner {
    checker: FirmwareChecker,
    limit: ConcurrencyLimit,
    progress: Arc<dyn ProgressReporter>,
}

impl FleetScanner {
    /// Create a scanner sharing `limit` with the rest of the fleet
    pub fn new(checker: FirmwareChecker, limit: ConcurrencyLimit) -> Self {
        Self {
            checker,
            limit,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Report scan progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// The checker each unit of work runs
    pub fn checker(&self) -> &FirmwareChecker {
        &self.checker
    }

    /// Check bare identifiers as native devices; each identifier is also the
    /// result name.
    pub async fn scan_all(&self, cancel: &CancelToken, identifiers: &[String]) -> Vec<CheckResult> {
        let devices: Vec<_> = identifiers
            .iter()
            .map(|id| DeviceDescriptor::native(id.as_str(), id.as_str()))
            .collect();
        self.scan_devices(cancel, &devices).await
    }

    /// Check every device in `devices`.
    ///
    /// After cancellation, units that have not started are skipped and units in
    /// flight record [`FirmwareError::Cancelled`]. Completed results are kept.
    pub async fn scan_devices(
        &self,
        cancel: &CancelToken,
        devices: &[DeviceDescriptor],
    ) -> Vec<CheckResult> {
        let permits = self.limit.get();
        let semaphore = Arc::new(Semaphore::new(permits));
        let results = Arc::new(Mutex::new(Vec::with_capacity(devices.len())));
        let mut tasks = JoinSet::new();

        info!(devices = devices.len(), permits, "Starting firmware scan");
        self.progress
            .start_progress(&format!("Checking {} devices for firmware updates", devices.len()));

        for device in devices {
            let device = device.clone();
            let checker = self.checker.clone();
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(device = %device.name, "Scan cancelled before check started");
                        return;
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_closed) => return,
                    },
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(FirmwareError::Cancelled {
                        device: device.name.clone(),
                    }),
                    result = checker.check(&device) => result,
                };

                if let Err(e) = &result {
                    warn!(device = %device.name, error = %e, "Firmware check failed");
                }
                results.lock().push(CheckResult {
                    name: device.name,
                    result,
                });
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Firmware check task failed: {e}");
            }
        }

        self.progress.stop_progress();

        let results = std::mem::take(&mut *results.lock());
        let failed = results.iter().filter(|r| r.result.is_err()).count();
        info!(
            checked = results.len(),
            failed,
            skipped = devices.len().saturating_sub(results.len()),
            "Firmware scan finished"
        );
        results
    }
}
