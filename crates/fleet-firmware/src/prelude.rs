//! Convenience re-exports for common fleet firmware types

pub use crate::cache::{CacheEntry, FirmwareCache};
pub use crate::cancel::CancelToken;
pub use crate::checker::FirmwareChecker;
pub use crate::config::{ConcurrencyLimit, FleetConfig};
pub use crate::connection::{ConnectionProvider, DeviceConnection, NativeUpdateCheck};
pub use crate::device::{DeviceAuth, DeviceDescriptor, DeviceKind};
pub use crate::error::{ErrorKind, FirmwareError};
pub use crate::executor::UpdateExecutor;
pub use crate::model::{
    CheckResult, FirmwareInfo, FirmwareStatus, ReleaseStage, StatusPoll, UpdateEntry, UpdateOpts,
    UpdateResult, UpdateSource,
};
pub use crate::persist::PersistentCache;
pub use crate::plugin::{PluginDispatcher, PluginHooks, PluginTable};
pub use crate::progress::{NoopProgress, ProgressReporter, TracingProgress};
pub use crate::registry::{DeviceRegistry, StaticRegistry};
pub use crate::scanner::FleetScanner;
pub use crate::selector::UpdateSelector;
pub use crate::service::FirmwareService;
