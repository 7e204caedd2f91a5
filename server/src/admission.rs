//! Lock-free ceiling on concurrently running sessions
//!
//! A slot is taken with a single compare-and-swap. Losing the race is treated
//! the same as being full: the caller is rejected rather than retried, so the
//! accept loop never waits for capacity. Slots are released by dropping the
//! [`AdmissionPermit`], which happens when the session task ends for any
//! reason.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct AdmissionControl {
    active: AtomicUsize,
    max: usize,
}

impl AdmissionControl {
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// One admission attempt: observe, check the ceiling, then a single CAS
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let current = self.active.load(Ordering::SeqCst);
        if current >= self.max {
            return None;
        }

        self.active
            .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| AdmissionPermit {
                control: Arc::clone(self),
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// Holds one admission slot until dropped
#[derive(Debug)]
pub struct AdmissionPermit {
    control: Arc<AdmissionControl>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.control.active.fetch_sub(1, Ordering::SeqCst);
    }
}
