//! Cache budget accounting
//!
//! Segment contents are cached in memory opportunistically, up to a global
//! byte budget. The budget is a single shared atomic counter so the hot
//! read path never takes a global lock for bookkeeping. A registered
//! memory-pressure source gates new cache fills; discarding all caches is
//! safe at any time and only affects performance.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Current memory pressure as reported by the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Free,
    Moderate,
    Critical,
}

/// Callback answering the current memory pressure
pub type PressureSource = Box<dyn Fn() -> MemoryPressure + Send + Sync>;

/// Global cache-byte budget shared by all segments
pub struct CacheBudget {
    /// Maximum bytes of segment content held in memory
    budget: u64,

    /// Bytes currently charged (atomic, lock-free)
    used: AtomicU64,

    /// Optional pressure source; `None` behaves as `Free`
    pressure: RwLock<Option<PressureSource>>,
}

impl CacheBudget {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: AtomicU64::new(0),
            pressure: RwLock::new(None),
        }
    }

    /// Register the memory-pressure source consulted before cache fills
    pub fn set_pressure_source(&self, source: PressureSource) {
        *self.pressure.write() = Some(source);
    }

    fn current_pressure(&self) -> MemoryPressure {
        match self.pressure.read().as_ref() {
            Some(source) => source(),
            None => MemoryPressure::Free,
        }
    }

    /// Try to reserve `bytes` of cache room.
    ///
    /// Fails when the pressure signal is not `Free` or the budget would be
    /// exceeded; the caller then falls back to direct reads.
    pub fn try_charge(&self, bytes: u64) -> bool {
        if self.current_pressure() != MemoryPressure::Free {
            return false;
        }
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let next = match used.checked_add(bytes) {
                Some(next) if next <= self.budget => next,
                _ => return false,
            };
            match self.used.compare_exchange_weak(
                used,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => used = actual,
            }
        }
    }

    /// Return `bytes` previously reserved with [`try_charge`].
    pub fn release(&self, bytes: u64) {
        let prev = self.used.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(prev >= bytes, "cache accounting underflow");
    }

    /// Bytes currently charged against the budget
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }
}
