//! Firmware data model shared by the checker, selector and executor

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::device::DeviceDescriptor;
use crate::error::FirmwareError;

/// Result of one firmware check. Produced fresh on every check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Running firmware version
    pub current: String,

    /// Newest stable version offered, empty if none
    pub available: String,

    /// Newest beta version offered, empty if none
    pub beta: String,

    /// Whether a stable update is available
    pub has_update: bool,

    /// Hardware model
    pub device_model: String,

    /// Device identifier reported by the device
    pub device_id: String,

    /// Device generation, 0 when unknown
    pub generation: u32,

    /// `"shelly"` for native devices, otherwise the plugin platform
    pub platform: String,
}

impl FirmwareInfo {
    /// A beta is offered and differs from the running version.
    pub fn has_beta(&self) -> bool {
        !self.beta.is_empty() && self.beta != self.current
    }
}

/// Live update status as polled from a device. Never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareStatus {
    /// Device-reported status string
    pub status: String,

    /// Whether an update is still available
    pub has_update: bool,

    /// Version being installed, if any
    pub new_version: String,

    /// Install progress 0-100
    pub progress: u8,

    /// Whether the previous firmware can be restored
    pub can_rollback: bool,
}

impl FirmwareStatus {
    /// The device is not installing anything.
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "idle" | "done")
    }

    /// The device reported a failed install.
    pub fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "failed" | "error")
    }
}

/// Outcome of checking one device during a fleet scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Device name
    pub name: String,

    /// Firmware info on success, the recorded cause on failure
    pub result: Result<FirmwareInfo, FirmwareError>,
}

impl CheckResult {
    /// Successful check.
    pub fn ok(name: impl Into<String>, info: FirmwareInfo) -> Self {
        Self {
            name: name.into(),
            result: Ok(info),
        }
    }

    /// Failed check.
    pub fn failed(name: impl Into<String>, error: FirmwareError) -> Self {
        Self {
            name: name.into(),
            result: Err(error),
        }
    }

    /// Firmware info, `None` if the check failed.
    pub fn info(&self) -> Option<&FirmwareInfo> {
        self.result.as_ref().ok()
    }

    /// Failure cause, `None` if the check succeeded.
    pub fn error(&self) -> Option<&FirmwareError> {
        self.result.as_ref().err()
    }
}

/// A device with an update on offer, as listed for selection.
///
/// Only built from successful checks; a failed check never yields an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    /// Device name
    pub name: String,

    /// Registry record
    pub device: DeviceDescriptor,

    /// Check result the entry was built from
    pub info: FirmwareInfo,

    /// Stable update available
    pub has_update: bool,

    /// Beta available and different from the running version
    pub has_beta: bool,
}

impl UpdateEntry {
    /// Build an entry from a device record and its firmware info.
    pub fn new(device: DeviceDescriptor, info: FirmwareInfo) -> Self {
        Self {
            name: device.name.clone(),
            has_update: info.has_update,
            has_beta: info.has_beta(),
            device,
            info,
        }
    }
}

/// Release channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStage {
    /// Stable releases
    Stable,

    /// Beta releases
    Beta,
}

impl ReleaseStage {
    /// Stage selected by a beta flag.
    pub fn from_beta(beta: bool) -> Self {
        if beta {
            ReleaseStage::Beta
        } else {
            ReleaseStage::Stable
        }
    }

    /// Stage name as used by devices and plugins.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStage::Stable => "stable",
            ReleaseStage::Beta => "beta",
        }
    }
}

impl std::fmt::Display for ReleaseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an update is installed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    /// Explicit firmware image URL
    CustomUrl(String),

    /// Latest beta
    Beta,

    /// Latest stable
    Stable,
}

impl UpdateSource {
    /// Release stage passed to plugin hooks. A custom URL installs as stable.
    pub fn stage(&self) -> ReleaseStage {
        match self {
            UpdateSource::Beta => ReleaseStage::Beta,
            UpdateSource::CustomUrl(_) | UpdateSource::Stable => ReleaseStage::Stable,
        }
    }

    /// Custom URL, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            UpdateSource::CustomUrl(url) => Some(url),
            UpdateSource::Beta | UpdateSource::Stable => None,
        }
    }
}

/// Status polling after an update has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPoll {
    /// Delay between polls
    #[serde(with = "duration_millis")]
    pub interval: Duration,

    /// Give up after this long
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for StatusPoll {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Options for a fleet update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOpts {
    /// Install beta instead of stable
    pub beta: bool,

    /// Install from this URL; takes precedence over `beta`
    pub custom_url: Option<String>,

    /// Requested parallelism, 0 means the global ceiling
    pub parallelism: usize,

    /// Wait for native devices to finish installing
    pub poll: Option<StatusPoll>,
}

impl UpdateOpts {
    /// Resolve the update source: custom URL, then beta, then stable.
    pub fn source(&self) -> UpdateSource {
        match self.custom_url.as_deref() {
            Some(url) if !url.is_empty() => UpdateSource::CustomUrl(url.to_string()),
            _ if self.beta => UpdateSource::Beta,
            _ => UpdateSource::Stable,
        }
    }
}

/// Outcome of updating one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Device name
    pub name: String,

    /// Success, or the cause of failure
    pub result: Result<(), FirmwareError>,

    /// Time spent on this device
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl UpdateResult {
    /// Whether the update was started (and, when polled, completed).
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// Failure cause, if any.
    pub fn error(&self) -> Option<&FirmwareError> {
        self.result.as_ref().err()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
