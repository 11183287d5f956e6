//! Progress reporting and cooperative cancellation.
//!
//! The converter is the sole writer of the progress value; any number of
//! other threads may read it or raise the cancel flag without blocking
//! the conversion.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use voluma_core::{Error, Result};

/// Monotone conversion progress in `[0, 1]`, readable from any thread.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    bits: Arc<AtomicU32>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress; never blocks.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Advance the progress value; regressions are ignored.
    pub(crate) fn set(&self, v: f32) {
        let v = v.clamp(0.0, 1.0);
        if v > self.value() {
            self.bits.store(v.to_bits(), Ordering::Release);
        }
    }

    /// Reset to zero at the start of a conversion run.
    pub(crate) fn reset(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

/// Cooperative cancellation flag, checked once per brick.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running conversion.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Surface the flag as an error for `?` propagation.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Weighted unit counter feeding a [`Progress`] handle.
pub(crate) struct ProgressTracker {
    progress: Progress,
    total: f64,
    done: f64,
}

impl ProgressTracker {
    pub fn new(progress: Progress, total: f64) -> Self {
        progress.reset();
        Self {
            progress,
            total: total.max(1.0),
            done: 0.0,
        }
    }

    /// Credit `units` of work; fractional units are fine.
    pub fn tick(&mut self, units: f64) {
        self.done += units;
        // Hold just below 1.0 until the run completes.
        let v = (self.done / self.total).min(0.9999);
        self.progress.set(v as f32);
    }

    /// Mark the run complete.
    pub fn finish(&self) {
        self.progress.set(1.0);
    }
}
