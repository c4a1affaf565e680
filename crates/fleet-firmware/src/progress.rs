//! Cosmetic progress reporting for long-running fleet operations

use parking_lot::Mutex;
use std::time::Instant;
use tracing::info;

/// Receives start/stop notifications around fleet operations.
///
/// Purely cosmetic; nothing in the crate depends on what a reporter does.
pub trait ProgressReporter: Send + Sync {
    /// An operation described by `message` started
    fn start_progress(&self, message: &str);

    /// The current operation finished
    fn stop_progress(&self);
}

/// Reporter that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn start_progress(&self, _message: &str) {}

    fn stop_progress(&self) {}
}

/// Reporter that logs start and elapsed time through `tracing`
#[derive(Debug, Default)]
pub struct TracingProgress {
    current: Mutex<Option<(String, Instant)>>,
}

impl TracingProgress {
    /// Create a reporter
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for TracingProgress {
    fn start_progress(&self, message: &str) {
        info!("{message}");
        *self.current.lock() = Some((message.to_string(), Instant::now()));
    }

    fn stop_progress(&self) {
        if let Some((message, started)) = self.current.lock().take() {
            info!(
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Finished: {message}"
            );
        }
    }
}
