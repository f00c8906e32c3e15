//! The shared sensor bus.
//!
//! One I²C bus is shared by every acquisition and maintenance task. Access
//! goes through [`SharedBus::with_bus`], which waits at most a bounded time
//! for the lock; on timeout the caller skips its cycle. The lock is released
//! before the closure's result is returned, so it is never held across a
//! radio call.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, with_timeout};
use log::warn;

use crate::error::BusError;

/// Lock wait for a measurement cycle.
pub const MEASUREMENT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
/// Lock wait for maintenance (calibration, health checks).
pub const MAINTENANCE_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

pub struct SharedBus<B> {
    inner: Mutex<CriticalSectionRawMutex, B>,
    skipped: AtomicU32,
}

impl<B> SharedBus<B> {
    pub const fn new(bus: B) -> Self {
        Self {
            inner: Mutex::new(bus),
            skipped: AtomicU32::new(0),
        }
    }

    /// Run `f` with exclusive bus access, waiting at most `wait` for it.
    pub async fn with_bus<R>(&self, wait: Duration, f: impl FnOnce(&mut B) -> R) -> Result<R, BusError> {
        match with_timeout(wait, self.inner.lock()).await {
            Ok(mut guard) => Ok(f(&mut *guard)),
            Err(_) => {
                let n = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("BUS: lock not acquired within {} ms (skipped {})", wait.as_millis(), n);
                Err(BusError::Timeout)
            }
        }
    }

    /// Cycles skipped because the lock was busy.
    pub fn skipped(&self) -> u32 {
        self.skipped.load(Ordering::Relaxed)
    }
}
