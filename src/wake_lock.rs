//! Reference-counted wake lock held around extraction
//!
//! The platform hold is taken when the count goes 0 → 1 and released when it goes
//! 1 → 0. The count never drops below zero.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Platform mechanism that keeps the device awake
pub trait WakeLockBackend: Send + Sync {
    /// Take the platform hold; the platform drops it on its own after `timeout`
    fn acquire(&self, timeout: Duration);

    /// Drop the platform hold
    fn release(&self);
}

/// Backend for platforms without a wake lock
#[derive(Debug, Default)]
pub struct NoopWakeLock;

impl WakeLockBackend for NoopWakeLock {
    fn acquire(&self, _timeout: Duration) {}

    fn release(&self) {}
}

/// Counted wake lock shared by every task in a [`crate::Sideloader`]
#[derive(Clone)]
pub struct WakeLock {
    count: Arc<Mutex<u32>>,
    backend: Arc<dyn WakeLockBackend>,
    timeout: Duration,
}

impl WakeLock {
    /// Create a wake lock over a backend
    pub fn new(backend: Arc<dyn WakeLockBackend>, timeout: Duration) -> Self {
        Self {
            count: Arc::new(Mutex::new(0)),
            backend,
            timeout,
        }
    }

    fn lock_count(&self) -> std::sync::MutexGuard<'_, u32> {
        match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Increment the hold count
    pub fn acquire(&self) {
        let mut count = self.lock_count();
        if *count == 0 {
            debug!(timeout_secs = self.timeout.as_secs(), "acquiring wake lock");
            self.backend.acquire(self.timeout);
        }
        *count += 1;
    }

    /// Decrement the hold count
    pub fn release(&self) {
        let mut count = self.lock_count();
        match *count {
            0 => warn!("wake lock released more times than acquired"),
            1 => {
                *count = 0;
                debug!("releasing wake lock");
                self.backend.release();
            }
            _ => *count -= 1,
        }
    }

    /// Drop every hold at once
    pub fn force_release(&self) {
        let mut count = self.lock_count();
        if *count > 0 {
            debug!(holds = *count, "force releasing wake lock");
            *count = 0;
            self.backend.release();
        }
    }

    /// Current hold count
    pub fn holds(&self) -> u32 {
        *self.lock_count()
    }

    /// Acquire and return a guard that releases on drop
    pub fn hold(&self) -> WakeLockHold {
        self.acquire();
        WakeLockHold { lock: self.clone() }
    }
}

/// Releases one hold when dropped
pub struct WakeLockHold {
    lock: WakeLock,
}

impl Drop for WakeLockHold {
    fn drop(&mut self) {
        self.lock.release();
    }
}
