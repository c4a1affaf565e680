//! Shared test utilities for fleet-firmware.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`mock`] - Fake connection providers, plugins and progress reporters
//! - [`fixtures`] - Device and firmware fixtures
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! fleet-test-helpers = { path = "crates/fleet-test-helpers" }
//! ```
//!
//! ```rust,ignore
//! use fleet_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod must;
pub mod prelude;

#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;

#[cfg(feature = "fixtures")]
#[cfg_attr(docsrs, doc(cfg(feature = "fixtures")))]
pub mod fixtures;

pub use must::*;
