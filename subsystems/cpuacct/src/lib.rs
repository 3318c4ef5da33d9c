//! # Helix CPU Accounting
//!
//! Per-group CPU time accounting for the Helix kernel. Every task belongs to
//! exactly one accounting group; groups form a tree rooted at the root group.
//! Every CPU charges the time it spends running a task into its own shard of
//! the task's group and of every ancestor, and monitoring consumers can read
//! a consistent summary of any group at any time.
//!
//! ## Components
//!
//! - **Counter bank** ([`bank`]): per-CPU high-resolution usage and
//!   tick-sampled cpustat counters
//! - **Migration tracker** ([`migration`]): per-CPU migration counts
//! - **Time reconciler** ([`cputime`]): rescales tick samples onto the
//!   high-resolution total without ever going backwards
//! - **Idle windows** ([`idle`]): idle / iowait / ineffective windows read
//!   through a sequence counter
//! - **Aggregator** ([`accounting`]): leaf-to-root charge walk
//! - **Snapshot reader** ([`snapshot`]): consistent per-group summary
//! - **Report files** ([`report`]): the textual control-file surface
//!
//! ## Concurrency
//!
//! There is no global lock over the accounting tree. Each CPU is the only
//! writer of its own shard; readers on other CPUs tolerate sub-tick
//! staleness. Nothing on the charge path allocates, blocks or sleeps.
//!
//! ```text
//!   tick / switch ──► HierarchicalAggregator ──► leaf ─► parent ─► … ─► root
//!                                                  │
//!   report ──► SnapshotReader ──► for each CPU: bank + reconciler + windows
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod accounting;
pub mod bank;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod cputime;
pub mod error;
pub mod group;
pub mod hierarchy;
pub mod idle;
pub mod kstat;
pub mod migration;
pub mod report;
pub mod seqcount;
pub mod snapshot;
pub mod stat;
pub mod subsys;

pub use accounting::HierarchicalAggregator;
pub use bank::PerCpuCounterBank;
pub use clock::{ClockSource, ManualClock};
pub use config::{AcctFeatures, CpuacctConfig};
pub use cpu::{CpuId, CpuMask, PerCpu};
pub use error::{CpuacctError, CpuacctResult};
pub use group::{CpuacctGroup, GroupId, TaskId};
pub use hierarchy::{GroupRegistry, Hierarchy};
pub use idle::{IdleWindowTracker, WindowSnapshot};
pub use kstat::{KernelCpustat, KernelStat};
pub use report::CpuacctFile;
pub use snapshot::{CpuacctStat, SnapshotReader, UsageSnapshot};
pub use stat::{Category, CpuTimeIndex, ExecMode, UsageIndex};
pub use subsys::CpuacctSubsys;

/// Upper bound on the number of possible CPUs
pub const MAX_CPUS: usize = 256;

/// Nanoseconds per second
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Default tick rate of the externally reported clock unit
pub const USER_HZ: u64 = 100;

/// Cache line size used to pad per-CPU slots
pub const CACHE_LINE_SIZE: usize = 64;
