//! Unwrap helpers with good error messages.
//!
//! These replace `unwrap()` and `expect()` in test code; `#[track_caller]`
//! keeps panic locations at the call site.

use fleet_firmware::{CheckResult, FirmwareError, FirmwareInfo, UpdateResult};
use std::fmt::Debug;

/// Unwrap a `Result`, panicking with the error value on `Err`.
///
/// ```rust
/// use fleet_test_helpers::must;
///
/// let result: Result<i32, &str> = Ok(42);
/// assert_eq!(must(result), 42);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

/// Unwrap an `Option`, panicking with `msg` on `None`.
///
/// # Panics
///
/// Panics if the option is `None`.
#[track_caller]
pub fn must_some<T>(option: Option<T>, msg: &str) -> T {
    match option {
        Some(v) => v,
        None => panic!("must_some: {msg}"),
    }
}

/// Unwrap a `Result` with a context message.
///
/// # Panics
///
/// Panics if the result is `Err`.
#[track_caller]
pub fn must_with<T, E: Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must_with: {context}: {e:?}"),
    }
}

/// Firmware info of a successful check.
///
/// # Panics
///
/// Panics if the check failed.
#[track_caller]
pub fn must_info(result: &CheckResult) -> &FirmwareInfo {
    match &result.result {
        Ok(info) => info,
        Err(e) => panic!("must_info: check of {} failed: {e}", result.name),
    }
}

/// Error of a failed update.
///
/// # Panics
///
/// Panics if the update succeeded.
#[track_caller]
pub fn must_fail(result: &UpdateResult) -> &FirmwareError {
    match &result.result {
        Ok(()) => panic!("must_fail: update of {} unexpectedly succeeded", result.name),
        Err(e) => e,
    }
}

/// Find the result named `name` in an unordered result list.
///
/// # Panics
///
/// Panics if no result has that name.
#[track_caller]
pub fn must_find<'a, T, F>(items: &'a [T], name: &str, key: F) -> &'a T
where
    F: Fn(&T) -> &str,
{
    match items.iter().find(|item| key(item) == name) {
        Some(item) => item,
        None => panic!("must_find: no result named {name}"),
    }
}

#[cfg(feature = "mock")]
mod async_helpers {
    use super::*;
    use std::future::Future;

    /// Await a future that returns `Result`, unwrapping on error.
    ///
    /// This is the async version of [`must`].
    pub async fn must_async<F, T, E>(future: F) -> T
    where
        F: Future<Output = Result<T, E>>,
        E: Debug,
    {
        match future.await {
            Ok(v) => v,
            Err(e) => panic!("must_async: unexpected Err: {e:?}"),
        }
    }
}

#[cfg(feature = "mock")]
pub use async_helpers::must_async;
