//! Fleet-wide firmware update orchestration
//!
//! This crate determines firmware update availability across a fleet of
//! network devices and rolls updates out to them:
//! - Per-device checks over native RPC or platform plugin hooks
//! - Bounded concurrent scans that tolerate per-device failure
//! - A firmware cache with read-time staleness and optional file persistence
//! - Stage filtering (stable/beta) and staged-percentage rollout selection
//! - Bounded parallel updates with independent per-device outcomes
//!
//! # Architecture
//!
//! - [`cache`]: In-memory firmware cache
//! - [`persist`]: JSON snapshot persistence for the cache
//! - [`checker`]: Single-device checks dispatched on [`DeviceKind`]
//! - [`scanner`]: Concurrent checks across many devices
//! - [`selector`]: Update list building, stage filtering, staged rollout
//! - [`executor`]: Concurrent updates and rollback
//! - [`service`]: Facade tying the above to one cache and one ceiling
//! - [`connection`], [`plugin`], [`registry`]: Collaborator interfaces
//! - [`config`]: Configuration and the shared concurrency ceiling
//! - [`error`]: Error types
//!
//! # Concurrency
//!
//! Every fan-out reads the shared [`ConcurrencyLimit`] when it starts, so a
//! runtime change applies to the next operation. Cancelling a [`CancelToken`]
//! stops units that have not started; results already produced are returned.
//!
//! # Example
//!
//! ```ignore
//! use fleet_firmware::prelude::*;
//!
//! # async fn example(
//! #     connections: std::sync::Arc<dyn ConnectionProvider>,
//! #     plugins: std::sync::Arc<dyn PluginDispatcher>,
//! #     devices: Vec<DeviceDescriptor>,
//! # ) {
//! let service = FirmwareService::new(connections, plugins, ConcurrencyLimit::new(5));
//! let cancel = CancelToken::new();
//!
//! // Update a quarter of the devices that have a stable update
//! let results = service
//!     .update_available(&cancel, &devices, 25, &UpdateOpts::default())
//!     .await;
//!
//! for result in results.iter().filter(|r| !r.success()) {
//!     println!("{}: {:?}", result.name, result.error());
//! }
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod cancel;
pub mod checker;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod executor;
pub mod model;
pub mod persist;
pub mod plugin;
pub mod prelude;
pub mod progress;
pub mod registry;
pub mod scanner;
pub mod selector;
pub mod service;

pub use cache::{CacheEntry, FirmwareCache};
pub use cancel::CancelToken;
pub use checker::{FirmwareChecker, offers_update};
pub use config::{ConcurrencyLimit, FleetConfig, SCHEMA_VERSION, StatusPollConfig};
pub use connection::{ConnectionProvider, DeviceConnection, NativeUpdateCheck, with_connection};
pub use device::{DeviceAuth, DeviceDescriptor, DeviceKind, NATIVE_PLATFORM};
pub use error::{ErrorKind, FirmwareError};
pub use executor::{ParallelismExceeded, UpdateExecutor, effective_parallelism};
pub use model::{
    CheckResult, FirmwareInfo, FirmwareStatus, ReleaseStage, StatusPoll, UpdateEntry, UpdateOpts,
    UpdateResult, UpdateSource,
};
pub use persist::PersistentCache;
pub use plugin::{
    PluginApplyResult, PluginDispatcher, PluginHooks, PluginTable, PluginUpdateCheck,
    decode_apply_response, decode_check_response,
};
pub use progress::{NoopProgress, ProgressReporter, TracingProgress};
pub use registry::{DeviceRegistry, StaticRegistry};
pub use scanner::FleetScanner;
pub use selector::{
    UpdateSelector, build_update_list, filter_entries_by_stage, get_entries_by_indices,
    select_entries_by_stage, staged_target_count,
};
pub use service::FirmwareService;
