//! # Time Reconciler
//!
//! The scheduler samples user/system time at tick granularity, and keeps the
//! precise execution time separately. Reporting the tick samples directly
//! jumps and can even go backwards between reads; reporting only the precise
//! total loses the split. The reconciler scales the tick ratio onto the
//! precise total and clamps against what was reported last, so every reported
//! component is monotonic and the pair always adds up to the precise total.
//!
//! Each group keeps two cursors per CPU:
//!
//! ```text
//!   precise total ──split 1──►  user+nice │ system
//!                                   │
//!                  ──split 2──►  user │ nice
//! ```

use spin::Mutex;

/// Raw sample fed to one reconciliation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCputime {
    /// Precise execution time
    pub sum_exec_runtime: u64,
    /// Tick-sampled time of the `utime` side
    pub utime: u64,
    /// Tick-sampled time of the `stime` side
    pub stime: u64,
}

/// Reconciled split of a precise total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CputimePair {
    /// `utime` side
    pub utime: u64,
    /// `stime` side
    pub stime: u64,
}

impl CputimePair {
    /// Sum of both sides
    #[inline]
    pub fn total(&self) -> u64 {
        self.utime.saturating_add(self.stime)
    }
}

/// `value * rtime / total` without intermediate overflow
#[inline]
pub fn scale_time(value: u64, rtime: u64, total: u64) -> u64 {
    debug_assert!(total != 0);
    ((value as u128 * rtime as u128) / total as u128) as u64
}

/// Reconciliation cursor: the last split reported for one (CPU, group, split)
#[derive(Debug, Default)]
pub struct PrevCputime {
    prev: Mutex<CputimePair>,
}

impl PrevCputime {
    /// Fresh cursor
    pub const fn new() -> Self {
        Self {
            prev: Mutex::new(CputimePair { utime: 0, stime: 0 }),
        }
    }

    /// Reconcile a sample against the cursor and advance it
    pub fn adjust(&self, curr: &TaskCputime) -> CputimePair {
        let mut prev = self.prev.lock();
        let next = adjust_pair(&prev, curr);
        *prev = next;
        next
    }

    /// Forget the reported split; only done when the whole group is reset
    pub fn reset(&self) {
        *self.prev.lock() = CputimePair::default();
    }
}

/// One reconciliation step.
///
/// Returns `prev` unchanged when the precise total has not moved past what
/// was already reported. Otherwise the result satisfies
/// `utime >= prev.utime`, `stime >= prev.stime` and
/// `utime + stime == sum_exec_runtime`.
pub fn adjust_pair(prev: &CputimePair, curr: &TaskCputime) -> CputimePair {
    let rtime = curr.sum_exec_runtime;

    if prev.total() >= rtime {
        return *prev;
    }

    let ticks = curr.utime.saturating_add(curr.stime);
    let mut stime = if ticks == 0 {
        // No tick landed on either side: keep feeding the side that already
        // had a share, system when both or neither did
        if prev.utime != 0 && prev.stime == 0 {
            0
        } else {
            rtime
        }
    } else {
        rtime - scale_time(curr.utime, rtime, ticks)
    };

    if stime < prev.stime {
        stime = prev.stime;
    }
    let mut utime = rtime - stime;
    if utime < prev.utime {
        utime = prev.utime;
        stime = rtime - utime;
    }

    CputimePair { utime, stime }
}

/// Reconciled user / nice / system time of one (CPU, group)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciledTimes {
    /// User time
    pub user: u64,
    /// Nice time
    pub nice: u64,
    /// System time
    pub system: u64,
}

/// Both reconciliation cursors of one (CPU, group)
#[derive(Debug, Default)]
pub struct ReconciliationState {
    /// `(user + nice, system)` split of the precise total
    exec_split: PrevCputime,
    /// `(user, nice)` split of the user + nice share
    user_split: PrevCputime,
}

impl ReconciliationState {
    /// Fresh cursors
    pub const fn new() -> Self {
        Self {
            exec_split: PrevCputime::new(),
            user_split: PrevCputime::new(),
        }
    }

    /// Split the precise execution time using the tick samples
    pub fn reconcile(
        &self,
        exec_runtime: u64,
        tick_user: u64,
        tick_nice: u64,
        tick_system: u64,
    ) -> ReconciledTimes {
        let first = self.exec_split.adjust(&TaskCputime {
            sum_exec_runtime: exec_runtime,
            utime: tick_user.saturating_add(tick_nice),
            stime: tick_system,
        });

        let second = self.user_split.adjust(&TaskCputime {
            sum_exec_runtime: first.utime,
            utime: tick_user,
            stime: tick_nice,
        });

        ReconciledTimes {
            user: second.utime,
            nice: second.stime,
            system: first.stime,
        }
    }

    /// Reset both cursors
    pub fn reset(&self) {
        self.exec_split.reset();
        self.user_split.reset();
    }
}

// =============================================================================
// TESTS
// =============================================================================
