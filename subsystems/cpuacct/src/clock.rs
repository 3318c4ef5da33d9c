//! # Clock Source
//!
//! Monotonic per-CPU clock used for window durations and elapsed time.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::cpu::CpuId;

/// Monotonic nanosecond clock, readable for any CPU
pub trait ClockSource: Send + Sync {
    /// Current time of `cpu` in nanoseconds
    fn cpu_clock(&self, cpu: CpuId) -> u64;
}

/// Clock advanced explicitly by its owner.
///
/// Used when the platform timer is not up yet and for deterministic replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock starting at `start` nanoseconds
    pub const fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Current time
    #[inline]
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    /// Move the clock to `now`; earlier values are ignored
    pub fn set(&self, now: u64) {
        self.now.fetch_max(now, Ordering::AcqRel);
    }

    /// Advance by `delta` and return the new time
    pub fn advance(&self, delta: u64) -> u64 {
        self.now.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

impl ClockSource for ManualClock {
    fn cpu_clock(&self, _cpu: CpuId) -> u64 {
        self.now()
    }
}
