//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use fleet_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_fail, must_find, must_info, must_some, must_with};

#[cfg(feature = "mock")]
pub use crate::must::must_async;

#[cfg(feature = "fixtures")]
pub use crate::fixtures::{
    check_ok, firmware_info, native_devices, plugin_devices, registry, update_entry,
};

#[cfg(feature = "mock")]
pub use crate::mock::{ApplyCall, MockDevice, MockFleet, RecordingProgress, ScriptedPlugin, status};

/// Result type for tests that propagate errors with `?`
pub type TestResult = Result<(), Box<dyn std::error::Error>>;
