//! Progress and log sinks.

use tracing::{debug, info};

/// Fire-and-forget sink for status messages and progress fractions.
///
/// Correction runs report through this instead of a concrete UI so they
/// can be driven from a CLI, a batch job, or a test with no output at all.
pub trait ProgressSink: Send + Sync {
    /// Appends a log line.
    fn log(&self, message: &str);

    /// Reports overall progress in `[0, 1]`.
    fn set_progress(&self, fraction: f64);

    /// Replaces the current short status text.
    fn set_status(&self, status: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn log(&self, message: &str) {
        info!("{}", message);
    }

    fn set_progress(&self, fraction: f64) {
        debug!(progress = fraction.clamp(0.0, 1.0), "progress");
    }

    fn set_status(&self, status: &str) {
        info!(status, "status");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn log(&self, _message: &str) {}
    fn set_progress(&self, _fraction: f64) {}
    fn set_status(&self, _status: &str) {}
}
