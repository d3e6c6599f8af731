//! The occupancy slot: the single system-wide marker of who holds the
//! resource.
//!
//! All check-and-set logic runs while holding a `SlotGuard`, so "nobody is
//! occupying" and "claim it" happen as one indivisible step. The atomic
//! flag mirrors the holder for lock-free status reads (health checks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::id::RequestId;

#[derive(Default)]
pub struct OccupancySlot {
    holder: Mutex<Option<RequestId>>,
    occupied: AtomicBool,
}

impl OccupancySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive access to the slot.
    ///
    /// The slot only stores an `Option<RequestId>`, which is valid in every
    /// state, so a poisoned lock is recovered rather than propagated.
    pub fn lock(&self) -> SlotGuard<'_> {
        let guard = self.holder.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Occupancy slot mutex poisoned - recovering");
            PoisonError::into_inner(poisoned)
        });
        SlotGuard {
            holder: guard,
            occupied: &self.occupied,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }
}

/// Exclusive view of the slot. Dropping it releases the lock.
pub struct SlotGuard<'a> {
    holder: MutexGuard<'a, Option<RequestId>>,
    occupied: &'a AtomicBool,
}

impl SlotGuard<'_> {
    pub fn holder(&self) -> Option<RequestId> {
        *self.holder
    }

    /// Claim the slot for `id`. Returns the current holder if already taken.
    pub fn claim(&mut self, id: RequestId) -> Result<(), RequestId> {
        if let Some(current) = *self.holder {
            return Err(current);
        }
        *self.holder = Some(id);
        self.occupied.store(true, Ordering::Release);
        Ok(())
    }

    /// Release the slot if `id` holds it. Returns whether it was released.
    pub fn release(&mut self, id: RequestId) -> bool {
        if *self.holder != Some(id) {
            return false;
        }
        *self.holder = None;
        self.occupied.store(false, Ordering::Release);
        true
    }
}
