//! # Idle Window Tracker
//!
//! Tracks, per (CPU, group), three kinds of time window:
//!
//! - **idle**: the CPU is assigned to the group but runs none of its tasks
//! - **iowait**: nested inside idle, while group tasks on that CPU are
//!   blocked on I/O
//! - **ineffective**: the CPU is not assigned to the group at all
//!
//! ```text
//!  time ─────────────────────────────────────────────────────────►
//!  idle         [=========)          [======)
//!  iowait          [===)
//!  ineffective                [====)
//! ```
//!
//! Idle and ineffective windows are published through a [`SeqCount`] so any
//! CPU can read them without stopping the writer. The owning CPU moves the
//! idle window while the cpuset controller moves both, so writers take a
//! per-window spin lock around the sequence section and test the mutual
//! exclusion of the two windows under it. The iowait sub-state is touched
//! both from the idle path and from tasks entering or leaving I/O wait, so it
//! sits behind its own short spin lock.
//!
//! Lock order: `writer` before `iowait`.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::cpu::{CpuId, PerCpu};
use crate::error::CpuacctResult;
use crate::seqcount::SeqCount;

/// Start timestamp of a window that is not open
const CLOSED: u64 = u64::MAX;

/// Accumulated window times of one (CPU, group) at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Idle time, excluding iowait
    pub idle: u64,
    /// Iowait time
    pub iowait: u64,
    /// Ineffective time
    pub ineffective: u64,
}

impl WindowSnapshot {
    /// Idle time including iowait
    #[inline]
    pub fn gross_idle(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }
}

/// Steal time: elapsed time not covered by idle, execution or ineffective
/// windows, never negative
#[inline]
pub fn steal_time(elapsed: u64, idle: u64, raw_exec: u64, ineffective: u64) -> u64 {
    let complement = idle.saturating_add(raw_exec).saturating_add(ineffective);
    elapsed.saturating_sub(complement)
}

#[derive(Debug)]
struct IowaitState {
    nr_iowait: u32,
    start: Option<u64>,
    sum: u64,
}

impl IowaitState {
    fn close(&mut self, now: u64) -> bool {
        match self.start.take() {
            Some(start) => {
                self.sum += now.saturating_sub(start);
                true
            },
            None => false,
        }
    }
}

/// Window state of one (CPU, group)
#[derive(Debug)]
pub struct IdleWindow {
    writer: Mutex<()>,
    seq: SeqCount,
    idle_start: AtomicU64,
    idle_sum: AtomicU64,
    ineffective_start: AtomicU64,
    ineffective_sum: AtomicU64,
    iowait: Mutex<IowaitState>,
    sum_exec_raw: AtomicU64,
    init_time: u64,
}

impl IdleWindow {
    /// All windows closed, elapsed time measured from `init_time`
    pub fn new(init_time: u64) -> Self {
        Self {
            writer: Mutex::new(()),
            seq: SeqCount::new(),
            idle_start: AtomicU64::new(CLOSED),
            idle_sum: AtomicU64::new(0),
            ineffective_start: AtomicU64::new(CLOSED),
            ineffective_sum: AtomicU64::new(0),
            iowait: Mutex::new(IowaitState {
                nr_iowait: 0,
                start: None,
                sum: 0,
            }),
            sum_exec_raw: AtomicU64::new(0),
            init_time,
        }
    }

    /// Clock value the group started being accounted on this CPU
    #[inline]
    pub fn init_time(&self) -> u64 {
        self.init_time
    }

    /// Whether the idle window is open
    #[inline]
    pub fn is_idle_open(&self) -> bool {
        self.idle_start.load(Ordering::Acquire) != CLOSED
    }

    /// Whether the iowait window is open
    pub fn is_iowait_open(&self) -> bool {
        self.iowait.lock().start.is_some()
    }

    /// Whether the ineffective window is open
    #[inline]
    pub fn is_ineffective_open(&self) -> bool {
        self.ineffective_start.load(Ordering::Acquire) != CLOSED
    }

    /// Open the idle window.
    ///
    /// Also opens the iowait window when group tasks are waiting on I/O.
    /// Returns `false` if idle was already open or the CPU is ineffective.
    pub fn open_idle(&self, now: u64) -> bool {
        let _writer = self.writer.lock();
        if self.is_idle_open() || self.is_ineffective_open() {
            return false;
        }

        self.seq.write(|| self.idle_start.store(now, Ordering::Relaxed));

        let mut iowait = self.iowait.lock();
        if iowait.nr_iowait > 0 && iowait.start.is_none() {
            iowait.start = Some(now);
        }
        true
    }

    /// Close the idle window, folding its length into the idle sum.
    ///
    /// Closes an open iowait window as well. Returns `false` if idle was not
    /// open.
    pub fn close_idle(&self, now: u64) -> bool {
        let _writer = self.writer.lock();
        let start = self.idle_start.load(Ordering::Relaxed);
        if start == CLOSED {
            return false;
        }

        self.seq.write(|| {
            self.idle_sum
                .fetch_add(now.saturating_sub(start), Ordering::Relaxed);
            self.idle_start.store(CLOSED, Ordering::Relaxed);
        });

        self.iowait.lock().close(now);
        true
    }

    /// A group task on this CPU starts waiting on I/O.
    ///
    /// The iowait window only opens while idle is open; otherwise it opens
    /// with the next idle window. Returns whether a window was opened.
    pub fn open_iowait(&self, now: u64) -> bool {
        let mut iowait = self.iowait.lock();
        iowait.nr_iowait = iowait.nr_iowait.saturating_add(1);
        if self.is_idle_open() && iowait.start.is_none() {
            iowait.start = Some(now);
            return true;
        }
        false
    }

    /// A group task on this CPU stops waiting on I/O.
    ///
    /// Closes the iowait window when the last waiter leaves. Returns whether
    /// a window was closed.
    pub fn close_iowait(&self, now: u64) -> bool {
        let mut iowait = self.iowait.lock();
        iowait.nr_iowait = iowait.nr_iowait.saturating_sub(1);
        if iowait.nr_iowait == 0 {
            return iowait.close(now);
        }
        false
    }

    /// Open the ineffective window; refused while idle is open
    pub fn open_ineffective(&self, now: u64) -> bool {
        let _writer = self.writer.lock();
        if self.is_ineffective_open() || self.is_idle_open() {
            return false;
        }
        self.seq
            .write(|| self.ineffective_start.store(now, Ordering::Relaxed));
        true
    }

    /// Close the ineffective window, folding its length into the sum
    pub fn close_ineffective(&self, now: u64) -> bool {
        let _writer = self.writer.lock();
        let start = self.ineffective_start.load(Ordering::Relaxed);
        if start == CLOSED {
            return false;
        }
        self.seq.write(|| {
            self.ineffective_sum
                .fetch_add(now.saturating_sub(start), Ordering::Relaxed);
            self.ineffective_start.store(CLOSED, Ordering::Relaxed);
        });
        true
    }

    /// Record precise execution time of the group on this CPU
    #[inline]
    pub fn charge_exec(&self, delta: u64) {
        self.sum_exec_raw.fetch_add(delta, Ordering::Relaxed);
    }

    /// Precise execution time of the group on this CPU; not affected by reset
    #[inline]
    pub fn sum_exec_raw(&self) -> u64 {
        self.sum_exec_raw.load(Ordering::Relaxed)
    }

    /// Steal time at `now`, computed from a `snap` taken at the same `now`
    pub fn steal(&self, snap: &WindowSnapshot, now: u64) -> u64 {
        steal_time(
            now.saturating_sub(self.init_time),
            snap.gross_idle(),
            self.sum_exec_raw(),
            snap.ineffective,
        )
    }

    /// Accumulated windows, with open windows extended to `now`
    pub fn snapshot(&self, now: u64) -> WindowSnapshot {
        let (gross_idle, ineffective) = self.seq.read(|| {
            (
                extend(&self.idle_sum, &self.idle_start, now),
                extend(&self.ineffective_sum, &self.ineffective_start, now),
            )
        });

        let iowait = {
            let state = self.iowait.lock();
            match state.start {
                Some(start) if now > start => state.sum + (now - start),
                _ => state.sum,
            }
        };

        WindowSnapshot {
            idle: gross_idle.saturating_sub(iowait),
            iowait,
            ineffective,
        }
    }
}

#[inline]
fn extend(sum: &AtomicU64, start: &AtomicU64, now: u64) -> u64 {
    let sum = sum.load(Ordering::Relaxed);
    let start = start.load(Ordering::Relaxed);
    if start != CLOSED && now > start {
        sum + (now - start)
    } else {
        sum
    }
}

/// Window state of one group across every possible CPU
#[derive(Debug)]
pub struct IdleWindowTracker {
    windows: PerCpu<IdleWindow>,
}

impl IdleWindowTracker {
    /// Allocate closed windows, reading each CPU's init time from `init_time`
    pub fn try_new<F>(nr_cpus: usize, mut init_time: F) -> CpuacctResult<Self>
    where
        F: FnMut(CpuId) -> u64,
    {
        Ok(Self {
            windows: PerCpu::try_new_with(nr_cpus, |cpu| IdleWindow::new(init_time(cpu)))?,
        })
    }

    /// Window state of `cpu`
    #[inline]
    pub fn cpu(&self, cpu: CpuId) -> &IdleWindow {
        self.windows.get(cpu)
    }

    /// Accumulated windows of `cpu` at `now`
    #[inline]
    pub fn snapshot(&self, cpu: CpuId, now: u64) -> WindowSnapshot {
        self.windows.get(cpu).snapshot(now)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_open_window_extends_until_closed() {
        let window = IdleWindow::new(0);
        assert!(window.open_idle(10));
        assert_eq!(window.snapshot(15).idle, 5);

        assert!(window.close_idle(20));
        assert_eq!(window.snapshot(20).idle, 10);
        assert_eq!(window.snapshot(1_000).idle, 10);
    }

    #[test]
    fn test_double_open_and_close_are_refused() {
        let window = IdleWindow::new(0);
        assert!(!window.close_idle(5));
        assert!(window.open_idle(5));
        assert!(!window.open_idle(6));
        assert!(window.close_idle(9));
        assert!(!window.close_idle(10));
        assert_eq!(window.snapshot(10).idle, 4);
    }

    #[test]
    fn test_iowait_nested_in_idle_and_not_double_counted() {
        let window = IdleWindow::new(0);
        assert!(window.open_idle(100));
        assert!(window.open_iowait(110));
        assert!(window.is_iowait_open());
        assert!(window.close_iowait(130));
        assert!(window.close_idle(200));

        let snap = window.snapshot(200);
        assert_eq!(snap.iowait, 20);
        assert_eq!(snap.idle, 80);
        assert_eq!(snap.gross_idle(), 100);
    }

    #[test]
    fn test_iowait_waits_for_idle() {
        let window = IdleWindow::new(0);
        // Task blocks on I/O while the CPU is still busy
        assert!(!window.open_iowait(10));
        assert!(!window.is_iowait_open());

        // Going idle with a waiter pending opens both windows
        assert!(window.open_idle(20));
        assert!(window.is_iowait_open());

        // Leaving idle closes the iowait window too
        assert!(window.close_idle(50));
        assert!(!window.is_iowait_open());
        assert_eq!(window.snapshot(50).iowait, 30);
        assert_eq!(window.snapshot(50).idle, 0);
    }

    #[test]
    fn test_iowait_closes_with_last_waiter() {
        let window = IdleWindow::new(0);
        window.open_idle(0);
        assert!(window.open_iowait(10));
        assert!(!window.open_iowait(12));
        assert!(!window.close_iowait(20));
        assert!(window.is_iowait_open());
        assert!(window.close_iowait(30));
        assert_eq!(window.snapshot(40).iowait, 20);
    }

    #[test]
    fn test_ineffective_excludes_idle() {
        let window = IdleWindow::new(0);
        assert!(window.open_idle(0));
        assert!(!window.open_ineffective(5));

        assert!(window.close_idle(10));
        assert!(window.open_ineffective(10));
        assert!(!window.open_idle(12));
        assert_eq!(window.snapshot(15).ineffective, 5);

        assert!(window.close_ineffective(30));
        assert!(window.open_idle(30));
        let snap = window.snapshot(40);
        assert_eq!(snap.ineffective, 20);
        assert_eq!(snap.idle, 20);
    }

    #[test]
    fn test_steal_is_unaccounted_time() {
        assert_eq!(steal_time(100, 30, 40, 10), 20);
        assert_eq!(steal_time(100, 60, 40, 10), 0);
        assert_eq!(steal_time(0, u64::MAX, u64::MAX, 1), 0);

        let tracker = IdleWindowTracker::try_new(1, |_| 1_000).unwrap();
        let window = tracker.cpu(CpuId(0));
        window.charge_exec(300);
        window.open_idle(1_300);
        window.close_idle(1_800);
        // elapsed 1000, idle 500, exec 300 -> steal 200
        let snap = tracker.snapshot(CpuId(0), 2_000);
        assert_eq!(window.steal(&snap, 2_000), 200);
    }

    #[test]
    fn test_steal_uses_the_given_snapshot() {
        let window = IdleWindow::new(0);
        window.charge_exec(20);
        window.open_idle(20);

        let snap = window.snapshot(50);
        // The window moves on after the snapshot was taken
        window.close_idle(40);
        window.open_ineffective(40);

        let steal = window.steal(&snap, 50);
        assert_eq!(snap.gross_idle(), 30);
        assert_eq!(steal, 0);
        assert_eq!(snap.gross_idle() + 20 + snap.ineffective + steal, 50);
    }

    #[test]
    fn test_owner_and_controller_writers_serialize() {
        let window = Arc::new(IdleWindow::new(0));
        let done = Arc::new(AtomicBool::new(false));

        // Owning CPU toggles idle
        let owner = {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                for t in 0..20_000u64 {
                    window.open_idle(t);
                    window.close_idle(t);
                }
            })
        };

        let reader = {
            let window = Arc::clone(&window);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = WindowSnapshot::default();
                while !done.load(Ordering::Acquire) {
                    // Only closed windows count at time zero
                    let snap = window.snapshot(0);
                    assert!(snap.idle >= last.idle);
                    assert!(snap.ineffective >= last.ineffective);
                    last = snap;
                }
            })
        };

        // Controller moves the CPU out of and back into the cpuset
        for t in 0..20_000u64 {
            window.close_idle(t);
            if window.open_ineffective(t) {
                // The owner cannot reopen idle while the CPU is ineffective
                assert!(!window.is_idle_open());
                assert!(window.close_ineffective(t + 1));
            }
            window.open_idle(t + 1);
        }

        owner.join().unwrap();
        done.store(true, Ordering::Release);
        reader.join().unwrap();

        assert!(!window.is_ineffective_open());
        assert!(window.snapshot(0).ineffective <= 20_000);
    }

    #[test]
    fn test_concurrent_reader_sees_monotonic_idle() {
        let window = Arc::new(IdleWindow::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let window = Arc::clone(&window);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    // Only closed windows count at time zero
                    let snap = window.snapshot(0);
                    assert!(snap.idle >= last);
                    assert_eq!(snap.idle % 5, 0);
                    assert!(!window.is_ineffective_open());
                    last = snap.idle;
                }
            })
        };

        for i in 0..10_000u64 {
            let t = i * 10;
            window.open_idle(t);
            window.close_idle(t + 5);
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();

        assert_eq!(window.snapshot(100_000).idle, 50_000);
    }
}
