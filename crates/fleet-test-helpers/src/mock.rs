//! Fakes for the fleet-firmware collaborator traits.
//!
//! [`MockFleet`] is a connection provider that counts simultaneous calls so
//! tests can assert concurrency bounds. [`ScriptedPlugin`] answers plugin hooks
//! from canned JSON. [`RecordingProgress`] keeps every progress event.

use async_trait::async_trait;
use fleet_firmware::{
    ConnectionProvider, DeviceAuth, DeviceConnection, FirmwareError, FirmwareStatus,
    NativeUpdateCheck, ProgressReporter, ReleaseStage, UpdateSource,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted behaviour of one fake native device
#[derive(Debug, Clone)]
pub struct MockDevice {
    /// Reply to the check RPC, or the connection error message
    pub check: Result<NativeUpdateCheck, String>,

    /// Error returned by the start-update RPC
    pub start_error: Option<String>,

    /// Status replies in order; the last one repeats
    pub statuses: VecDeque<FirmwareStatus>,

    /// Refuse connections entirely
    pub unreachable: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            check: Ok(NativeUpdateCheck::default()),
            start_error: None,
            statuses: VecDeque::new(),
            unreachable: false,
        }
    }
}

impl MockDevice {
    /// Device running `current` and offered `stable`
    pub fn offering(current: &str, stable: &str) -> Self {
        Self {
            check: Ok(NativeUpdateCheck {
                current_version: current.to_string(),
                stable: (!stable.is_empty()).then(|| stable.to_string()),
                beta: None,
                model: "SNSW-001P16EU".to_string(),
                device_id: format!("mock-{current}"),
                generation: 2,
            }),
            ..Default::default()
        }
    }

    /// Device that refuses connections
    pub fn unreachable() -> Self {
        Self {
            check: Err("connection refused".to_string()),
            unreachable: true,
            ..Default::default()
        }
    }

    /// Also offer `beta`
    pub fn with_beta(mut self, beta: &str) -> Self {
        if let Ok(check) = &mut self.check {
            check.beta = Some(beta.to_string());
        }
        self
    }

    /// Fail the start-update RPC with `message`
    pub fn failing_update(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    /// Reply to status polls with `statuses` in order
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = FirmwareStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }
}

#[derive(Debug, Default)]
struct FleetState {
    devices: Mutex<HashMap<String, MockDevice>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    connects: AtomicUsize,
    started: Mutex<Vec<(String, UpdateSource)>>,
    rollbacks: Mutex<Vec<String>>,
}

impl FleetState {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fake connection provider keyed by device identifier.
///
/// Unknown identifiers behave like [`MockFleet::with_default`]'s device.
#[derive(Debug, Clone)]
pub struct MockFleet {
    state: Arc<FleetState>,
    default: MockDevice,
    latency: Duration,
}

impl Default for MockFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFleet {
    /// Fleet where every device runs 1.0.0 and is offered 1.1.0
    pub fn new() -> Self {
        Self {
            state: Arc::new(FleetState::default()),
            default: MockDevice::offering("1.0.0", "1.1.0"),
            latency: Duration::ZERO,
        }
    }

    /// Behaviour for identifiers without their own script
    pub fn with_default(mut self, device: MockDevice) -> Self {
        self.default = device;
        self
    }

    /// Every RPC takes `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script the device reached as `identifier`
    pub fn set_device(&self, identifier: &str, device: MockDevice) {
        self.state
            .devices
            .lock()
            .insert(identifier.to_string(), device);
    }

    /// Highest number of simultaneous RPCs seen
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// RPCs currently running
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Connections opened so far
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Identifiers and sources of every accepted start-update RPC
    pub fn started_updates(&self) -> Vec<(String, UpdateSource)> {
        self.state.started.lock().clone()
    }

    /// Identifiers of every rollback RPC
    pub fn rollbacks(&self) -> Vec<String> {
        self.state.rollbacks.lock().clone()
    }

    fn device(&self, identifier: &str) -> MockDevice {
        self.state
            .devices
            .lock()
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl ConnectionProvider for MockFleet {
    async fn connect(&self, identifier: &str) -> Result<Box<dyn DeviceConnection>, FirmwareError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let device = self.device(identifier);
        if device.unreachable {
            return Err(FirmwareError::connection(identifier, "connection refused"));
        }

        Ok(Box::new(MockConnection {
            identifier: identifier.to_string(),
            device: Mutex::new(device),
            state: Arc::clone(&self.state),
            latency: self.latency,
        }))
    }
}

struct MockConnection {
    identifier: String,
    device: Mutex<MockDevice>,
    state: Arc<FleetState>,
    latency: Duration,
}

impl MockConnection {
    async fn rpc<T>(&self, f: impl FnOnce(&mut MockDevice) -> T) -> T {
        self.state.enter();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = f(&mut *self.device.lock());
        self.state.leave();
        result
    }
}

#[async_trait]
impl DeviceConnection for MockConnection {
    async fn check_for_update(&self) -> Result<NativeUpdateCheck, FirmwareError> {
        let identifier = self.identifier.clone();
        self.rpc(|device| {
            device
                .check
                .clone()
                .map_err(|e| FirmwareError::connection(identifier, e))
        })
        .await
    }

    async fn start_update(&self, source: &UpdateSource) -> Result<(), FirmwareError> {
        let result = self
            .rpc(|device| match &device.start_error {
                Some(message) => Err(FirmwareError::update_failed(&self.identifier, message)),
                None => Ok(()),
            })
            .await;
        if result.is_ok() {
            self.state
                .started
                .lock()
                .push((self.identifier.clone(), source.clone()));
        }
        result
    }

    async fn firmware_status(&self) -> Result<FirmwareStatus, FirmwareError> {
        self.rpc(|device| {
            let status = device.statuses.pop_front().unwrap_or_else(|| FirmwareStatus {
                status: "idle".to_string(),
                ..Default::default()
            });
            if device.statuses.is_empty() {
                device.statuses.push_back(status.clone());
            }
            Ok(status)
        })
        .await
    }

    async fn rollback(&self) -> Result<(), FirmwareError> {
        self.rpc(|_| ()).await;
        self.state.rollbacks.lock().push(self.identifier.clone());
        Ok(())
    }
}

/// One recorded apply-update hook call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCall {
    /// Device address
    pub address: String,
    /// Requested stage
    pub stage: ReleaseStage,
    /// Custom URL, if any
    pub url: Option<String>,
    /// Whether credentials were passed
    pub authenticated: bool,
}

/// Plugin answering hooks from canned JSON keyed by address.
#[derive(Debug)]
pub struct ScriptedPlugin {
    platform: String,
    checks: Mutex<HashMap<String, Value>>,
    default_check: Value,
    failing_applies: Mutex<HashMap<String, String>>,
    applies: Mutex<Vec<ApplyCall>>,
}

impl ScriptedPlugin {
    /// Plugin for `platform`; every device runs 1.0.0 with 1.1.0 available
    pub fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            checks: Mutex::new(HashMap::new()),
            default_check: json!({
                "current_version": "1.0.0",
                "latest_stable": "1.1.0",
                "latest_beta": "",
                "has_update": true
            }),
            failing_applies: Mutex::new(HashMap::new()),
            applies: Mutex::new(Vec::new()),
        }
    }

    /// Answer check-updates for `address` with `payload`
    pub fn set_check(&self, address: &str, payload: Value) {
        self.checks.lock().insert(address.to_string(), payload);
    }

    /// Report apply-update failure `message` for `address`
    pub fn fail_apply(&self, address: &str, message: &str) {
        self.failing_applies
            .lock()
            .insert(address.to_string(), message.to_string());
    }

    /// Every apply-update call so far
    pub fn applies(&self) -> Vec<ApplyCall> {
        self.applies.lock().clone()
    }
}

#[async_trait]
impl fleet_firmware::PluginHooks for ScriptedPlugin {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn execute_check_updates(
        &self,
        address: &str,
        _auth: Option<&DeviceAuth>,
    ) -> Result<Value, FirmwareError> {
        Ok(self
            .checks
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.default_check.clone()))
    }

    async fn execute_apply_update(
        &self,
        address: &str,
        auth: Option<&DeviceAuth>,
        stage: ReleaseStage,
        url: Option<&str>,
    ) -> Result<Value, FirmwareError> {
        self.applies.lock().push(ApplyCall {
            address: address.to_string(),
            stage,
            url: url.map(str::to_string),
            authenticated: auth.is_some(),
        });

        Ok(match self.failing_applies.lock().get(address) {
            Some(message) => json!({ "success": false, "error": message }),
            None => json!({ "success": true }),
        })
    }
}

/// Progress reporter that records `start:<message>` and `stop` events
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl RecordingProgress {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn start_progress(&self, message: &str) {
        self.events.lock().push(format!("start:{message}"));
    }

    fn stop_progress(&self) {
        self.events.lock().push("stop".to_string());
    }
}

/// A status reply with the given status string
pub fn status(status: &str, progress: u8, can_rollback: bool) -> FirmwareStatus {
    FirmwareStatus {
        status: status.to_string(),
        progress,
        can_rollback,
        ..Default::default()
    }
}
