//! Bounded parallel firmware updates with independent per-device outcomes

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::checker::FirmwareChecker;
use crate::config::ConcurrencyLimit;
use crate::connection::{DeviceConnection, with_connection};
use crate::device::{DeviceDescriptor, DeviceKind};
use crate::error::FirmwareError;
use crate::model::{StatusPoll, UpdateEntry, UpdateOpts, UpdateResult, UpdateSource};
use crate::plugin::decode_apply_response;
use crate::progress::{NoopProgress, ProgressReporter};

/// A requested parallelism above the global ceiling.
///
/// Not an error: the request is capped and the condition is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelismExceeded {
    /// Parallelism the caller asked for
    pub requested: usize,

    /// Ceiling it was capped to
    pub ceiling: usize,
}

impl std::fmt::Display for ParallelismExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requested parallelism {} exceeds ceiling {}",
            self.requested, self.ceiling
        )
    }
}

/// Resolve the parallelism actually used for a fan-out.
///
/// `requested == 0` means the ceiling. A request above the ceiling is capped
/// and reported.
pub fn effective_parallelism(
    requested: usize,
    ceiling: usize,
) -> (usize, Option<ParallelismExceeded>) {
    let ceiling = ceiling.max(1);
    match requested {
        0 => (ceiling, None),
        n if n > ceiling => (
            ceiling,
            Some(ParallelismExceeded {
                requested: n,
                ceiling,
            }),
        ),
        n => (n, None),
    }
}

/// Runs firmware updates across many devices
#[derive(Clone)]
pub struct UpdateExecutor {
    checker: FirmwareChecker,
    limit: ConcurrencyLimit,
    progress: Arc<dyn ProgressReporter>,
}

impl UpdateExecutor {
    /// Create an executor sharing `limit` with the rest of the fleet
    pub fn new(checker: FirmwareChecker, limit: ConcurrencyLimit) -> Self {
        Self {
            checker,
            limit,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Report update progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Update every entry's device; see [`UpdateExecutor::update_devices`].
    pub async fn update_entries(
        &self,
        cancel: &CancelToken,
        entries: &[UpdateEntry],
        opts: &UpdateOpts,
    ) -> Vec<UpdateResult> {
        let devices: Vec<_> = entries.iter().map(|e| e.device.clone()).collect();
        self.update_devices(cancel, &devices, opts).await
    }

    /// Start an update on every device in `devices`.
    ///
    /// Each device is attempted on its own; one failure never affects another.
    /// Results are in completion order. After cancellation, devices not yet
    /// started are skipped and those in flight record
    /// [`FirmwareError::Cancelled`].
    pub async fn update_devices(
        &self,
        cancel: &CancelToken,
        devices: &[DeviceDescriptor],
        opts: &UpdateOpts,
    ) -> Vec<UpdateResult> {
        let (parallelism, exceeded) = effective_parallelism(opts.parallelism, self.limit.get());
        if let Some(exceeded) = exceeded {
            warn!(
                requested = exceeded.requested,
                ceiling = exceeded.ceiling,
                "Parallelism capped to global ceiling"
            );
        }

        let source = opts.source();
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let results = Arc::new(Mutex::new(Vec::with_capacity(devices.len())));
        let mut tasks = JoinSet::new();

        info!(
            devices = devices.len(),
            parallelism,
            source = ?source,
            "Starting firmware update"
        );
        self.progress
            .start_progress(&format!("Updating firmware on {} devices", devices.len()));

        for device in devices {
            let device = device.clone();
            let checker = self.checker.clone();
            let source = source.clone();
            let poll = opts.poll;
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(device = %device.name, "Update cancelled before it started");
                        return;
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_closed) => return,
                    },
                };

                let started = Instant::now();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(FirmwareError::Cancelled {
                        device: device.name.clone(),
                    }),
                    result = update_one(&checker, &device, source, poll) => result,
                };

                match &result {
                    Ok(()) => info!(device = %device.name, "Firmware update started"),
                    Err(e) => warn!(device = %device.name, error = %e, "Firmware update failed"),
                }
                results.lock().push(UpdateResult {
                    name: device.name,
                    result,
                    duration: started.elapsed(),
                });
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Firmware update task failed: {e}");
            }
        }

        self.progress.stop_progress();

        let results = std::mem::take(&mut *results.lock());
        let failed = results.iter().filter(|r| !r.success()).count();
        info!(
            succeeded = results.len().saturating_sub(failed),
            failed,
            skipped = devices.len().saturating_sub(results.len()),
            "Firmware update finished"
        );
        results
    }

    /// Restore the previous firmware on a native device.
    ///
    /// Fails with [`FirmwareError::UpdateFailed`] when the device reports no
    /// firmware to roll back to; plugin-managed devices are unsupported.
    pub async fn rollback(&self, device: &DeviceDescriptor) -> Result<(), FirmwareError> {
        if let DeviceKind::Plugin(_) = device.kind() {
            return Err(FirmwareError::unsupported(&device.name, "rollback"));
        }

        let name = device.name.clone();
        with_connection(self.checker.connections(), device.identifier(), move |conn| {
            Box::pin(async move {
                let status = conn.firmware_status().await?;
                if !status.can_rollback {
                    return Err(FirmwareError::update_failed(
                        name,
                        "no previous firmware to roll back to",
                    ));
                }
                conn.rollback().await
            })
        })
        .await
        .map_err(|e| e.with_device(&device.name))?;

        info!(device = %device.name, "Firmware rollback started");
        Ok(())
    }
}

async fn update_one(
    checker: &FirmwareChecker,
    device: &DeviceDescriptor,
    source: UpdateSource,
    poll: Option<StatusPoll>,
) -> Result<(), FirmwareError> {
    let result = match device.kind() {
        DeviceKind::Native => update_native(checker, device, source, poll).await,
        DeviceKind::Plugin(platform) => update_plugin(checker, device, &platform, &source).await,
    };
    result.map_err(|e| e.with_device(&device.name))
}

async fn update_native(
    checker: &FirmwareChecker,
    device: &DeviceDescriptor,
    source: UpdateSource,
    poll: Option<StatusPoll>,
) -> Result<(), FirmwareError> {
    let name = device.name.clone();
    with_connection(checker.connections(), device.identifier(), move |conn| {
        Box::pin(async move {
            conn.start_update(&source).await?;
            match poll {
                Some(poll) => wait_for_install(conn, &name, poll).await,
                None => Ok(()),
            }
        })
    })
    .await
}

async fn update_plugin(
    checker: &FirmwareChecker,
    device: &DeviceDescriptor,
    platform: &str,
    source: &UpdateSource,
) -> Result<(), FirmwareError> {
    let plugin = checker.plugin_for(device, platform)?;
    let payload = plugin
        .execute_apply_update(
            &device.address,
            device.auth.as_ref(),
            source.stage(),
            source.url(),
        )
        .await?;
    let applied = decode_apply_response(&device.name, payload)?;

    if applied.success {
        Ok(())
    } else {
        Err(FirmwareError::update_failed(
            &device.name,
            applied
                .error
                .unwrap_or_else(|| "plugin reported failure".to_string()),
        ))
    }
}

async fn wait_for_install(
    conn: &dyn DeviceConnection,
    device: &str,
    poll: StatusPoll,
) -> Result<(), FirmwareError> {
    match tokio::time::timeout(poll.timeout, poll_until_settled(conn, device, poll.interval)).await
    {
        Ok(result) => result,
        Err(_elapsed) => Err(FirmwareError::update_failed(
            device,
            format!("update did not finish within {}s", poll.timeout.as_secs()),
        )),
    }
}

async fn poll_until_settled(
    conn: &dyn DeviceConnection,
    device: &str,
    interval: Duration,
) -> Result<(), FirmwareError> {
    loop {
        tokio::time::sleep(interval).await;
        let status = conn.firmware_status().await?;
        debug!(
            device,
            status = %status.status,
            progress = status.progress,
            "Polled firmware status"
        );

        if status.is_failed() {
            return Err(FirmwareError::update_failed(
                device,
                format!("device reported status '{}'", status.status),
            ));
        }
        if status.is_finished() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionProvider, NativeUpdateCheck};
    use crate::device::DeviceAuth;
    use crate::model::{FirmwareStatus, ReleaseStage};
    use crate::plugin::{PluginHooks, PluginTable};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Connection whose status replies are scripted per test
    struct ScriptedConnection {
        statuses: Arc<Mutex<VecDeque<FirmwareStatus>>>,
        started: Arc<Mutex<Vec<UpdateSource>>>,
        rolled_back: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl DeviceConnection for ScriptedConnection {
        async fn check_for_update(&self) -> Result<NativeUpdateCheck, FirmwareError> {
            Ok(NativeUpdateCheck::default())
        }

        async fn start_update(&self, source: &UpdateSource) -> Result<(), FirmwareError> {
            self.started.lock().push(source.clone());
            Ok(())
        }

        async fn firmware_status(&self) -> Result<FirmwareStatus, FirmwareError> {
            let mut statuses = self.statuses.lock();
            let next = statuses.pop_front().unwrap_or_default();
            if statuses.is_empty() {
                statuses.push_back(next.clone());
            }
            Ok(next)
        }

        async fn rollback(&self) -> Result<(), FirmwareError> {
            *self.rolled_back.lock() = true;
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct ScriptedProvider {
        statuses: Arc<Mutex<VecDeque<FirmwareStatus>>>,
        started: Arc<Mutex<Vec<UpdateSource>>>,
        rolled_back: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ConnectionProvider for ScriptedProvider {
        async fn connect(&self, identifier: &str) -> Result<Box<dyn DeviceConnection>, FirmwareError> {
            if identifier == "offline" {
                return Err(FirmwareError::connection(identifier, "host unreachable"));
            }
            Ok(Box::new(ScriptedConnection {
                statuses: Arc::clone(&self.statuses),
                started: Arc::clone(&self.started),
                rolled_back: Arc::clone(&self.rolled_back),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingPlugin {
        calls: Mutex<Vec<(ReleaseStage, Option<String>)>>,
    }

    #[async_trait]
    impl PluginHooks for RecordingPlugin {
        fn platform(&self) -> &str {
            "esphome"
        }

        async fn execute_check_updates(
            &self,
            _address: &str,
            _auth: Option<&DeviceAuth>,
        ) -> Result<Value, FirmwareError> {
            Ok(json!({ "current_version": "2024.1.0", "has_update": false }))
        }

        async fn execute_apply_update(
            &self,
            address: &str,
            _auth: Option<&DeviceAuth>,
            stage: ReleaseStage,
            url: Option<&str>,
        ) -> Result<Value, FirmwareError> {
            self.calls.lock().push((stage, url.map(str::to_string)));
            if address == "broken" {
                return Ok(json!({ "success": false, "error": "flash write failed" }));
            }
            Ok(json!({ "success": true }))
        }
    }

    fn status(s: &str, can_rollback: bool) -> FirmwareStatus {
        FirmwareStatus {
            status: s.to_string(),
            can_rollback,
            ..Default::default()
        }
    }

    fn build_executor(max: usize) -> (UpdateExecutor, ScriptedProvider, Arc<RecordingPlugin>) {
        let provider = ScriptedProvider::default();
        let plugin = Arc::new(RecordingPlugin::default());
        let table = PluginTable::new();
        table.register(Arc::clone(&plugin) as Arc<dyn PluginHooks>);
        let checker = FirmwareChecker::new(Arc::new(provider.clone()), Arc::new(table));
        (
            UpdateExecutor::new(checker, ConcurrencyLimit::new(max)),
            provider,
            plugin,
        )
    }

    #[test]
    fn test_effective_parallelism() {
        assert_eq!(effective_parallelism(0, 5), (5, None));
        assert_eq!(effective_parallelism(3, 5), (3, None));
        assert_eq!(effective_parallelism(5, 5), (5, None));
        assert_eq!(
            effective_parallelism(8, 5),
            (
                5,
                Some(ParallelismExceeded {
                    requested: 8,
                    ceiling: 5
                })
            )
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_parallelism_above_ceiling_is_capped_with_warning() {
        let (executor, provider, _) = build_executor(2);
        let devices: Vec<_> = (0..4)
            .map(|i| DeviceDescriptor::native(format!("d{i}"), format!("10.0.0.{i}")))
            .collect();
        let opts = UpdateOpts {
            parallelism: 10,
            ..Default::default()
        };

        let results = executor
            .update_devices(&CancelToken::new(), &devices, &opts)
            .await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(UpdateResult::success));
        assert_eq!(provider.started.lock().len(), 4);
        assert!(logs_contain("Parallelism capped to global ceiling"));
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_per_device() {
        let (executor, provider, _) = build_executor(4);
        let devices = vec![
            DeviceDescriptor::native("a", "10.0.0.1"),
            DeviceDescriptor::native("b", "offline"),
            DeviceDescriptor::native("c", "10.0.0.3"),
        ];

        let results = executor
            .update_devices(&CancelToken::new(), &devices, &UpdateOpts::default())
            .await;

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|r| !r.success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed.first().map(|r| r.name.as_str()), Some("b"));
        assert_eq!(provider.started.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_ceiling_and_request_are_capped() {
        let (executor, provider, _) = build_executor(usize::MAX);
        let opts = UpdateOpts {
            parallelism: usize::MAX,
            ..Default::default()
        };

        let results = executor
            .update_devices(&CancelToken::new(), &[DeviceDescriptor::native("a", "10.0.0.1")], &opts)
            .await;

        assert!(results.iter().all(UpdateResult::success));
        assert_eq!(provider.started.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_plugin_update_uses_stage_and_url() {
        let (executor, _, plugin) = build_executor(2);
        let devices = vec![DeviceDescriptor::plugin("node", "10.0.0.4", "esphome")];
        let opts = UpdateOpts {
            beta: true,
            custom_url: Some("http://fw.local/node.bin".to_string()),
            ..Default::default()
        };

        let results = executor
            .update_devices(&CancelToken::new(), &devices, &opts)
            .await;

        assert!(results.iter().all(UpdateResult::success));
        assert_eq!(
            *plugin.calls.lock(),
            vec![(
                ReleaseStage::Stable,
                Some("http://fw.local/node.bin".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_plugin_reported_failure_is_update_failed() {
        let (executor, _, _) = build_executor(2);
        let devices = vec![DeviceDescriptor::plugin("node", "broken", "esphome")];

        let results = executor
            .update_devices(&CancelToken::new(), &devices, &UpdateOpts::default())
            .await;

        assert_eq!(
            results.first().and_then(UpdateResult::error),
            Some(&FirmwareError::update_failed("node", "flash write failed"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_finished() {
        let (executor, provider, _) = build_executor(1);
        provider.statuses.lock().extend([
            status("updating", false),
            status("updating", false),
            status("idle", true),
        ]);
        let opts = UpdateOpts {
            poll: Some(StatusPoll {
                interval: Duration::from_secs(1),
                timeout: Duration::from_secs(30),
            }),
            ..Default::default()
        };

        let results = executor
            .update_devices(
                &CancelToken::new(),
                &[DeviceDescriptor::native("a", "10.0.0.1")],
                &opts,
            )
            .await;

        assert!(results.iter().all(UpdateResult::success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reports_device_failure_and_timeout() {
        let poll = Some(StatusPoll {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        });

        let (executor, provider, _) = build_executor(1);
        provider.statuses.lock().push_back(status("failed", false));
        let results = executor
            .update_devices(
                &CancelToken::new(),
                &[DeviceDescriptor::native("a", "10.0.0.1")],
                &UpdateOpts {
                    poll,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(
            results.first().and_then(UpdateResult::error),
            Some(FirmwareError::UpdateFailed { .. })
        ));

        let (executor, provider, _) = build_executor(1);
        provider.statuses.lock().push_back(status("updating", false));
        let results = executor
            .update_devices(
                &CancelToken::new(),
                &[DeviceDescriptor::native("a", "10.0.0.1")],
                &UpdateOpts {
                    poll,
                    ..Default::default()
                },
            )
            .await;
        let message = results
            .first()
            .and_then(UpdateResult::error)
            .map(ToString::to_string)
            .unwrap_or_default();
        assert!(message.contains("did not finish within 5s"));
    }

    #[tokio::test]
    async fn test_rollback_requires_can_rollback() {
        let device = DeviceDescriptor::native("a", "10.0.0.1");

        let (executor, provider, _) = build_executor(1);
        provider.statuses.lock().push_back(status("idle", false));
        assert!(matches!(
            executor.rollback(&device).await,
            Err(FirmwareError::UpdateFailed { .. })
        ));
        assert!(!*provider.rolled_back.lock());

        let (executor, provider, _) = build_executor(1);
        provider.statuses.lock().push_back(status("idle", true));
        assert_eq!(executor.rollback(&device).await, Ok(()));
        assert!(*provider.rolled_back.lock());

        let plugin_device = DeviceDescriptor::plugin("node", "10.0.0.4", "esphome");
        assert!(matches!(
            executor.rollback(&plugin_device).await,
            Err(FirmwareError::Unsupported { .. })
        ));
    }
}
