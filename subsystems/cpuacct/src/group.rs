//! # Accounting Groups
//!
//! A group owns all per-CPU accounting state of its tasks. Storage for the
//! whole possible-CPU range is allocated once at creation and lives until the
//! last reference is dropped.
//!
//! Each group holds a strong reference to its parent, so the charge path can
//! climb to the root without consulting the registry.

use alloc::sync::Arc;
use core::fmt;

use crate::bank::PerCpuCounterBank;
use crate::clock::ClockSource;
use crate::cpu::{CpuId, PerCpu};
use crate::cputime::ReconciliationState;
use crate::error::CpuacctResult;
use crate::idle::IdleWindowTracker;
use crate::migration::MigrationTracker;

/// Group identifier, unique for the lifetime of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u64);

impl GroupId {
    /// The root group
    pub const ROOT: Self = Self(0);

    /// Whether this is the root group
    #[inline]
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accounting state of one group
pub struct CpuacctGroup {
    id: GroupId,
    parent: Option<Arc<CpuacctGroup>>,
    bank: PerCpuCounterBank,
    cursors: PerCpu<ReconciliationState>,
    windows: IdleWindowTracker,
    migrations: MigrationTracker,
}

static_assertions::assert_impl_all!(CpuacctGroup: Send, Sync);

impl CpuacctGroup {
    /// Allocate a group below `parent`.
    ///
    /// Every per-CPU structure starts zeroed; each CPU's window tracker
    /// records the current time of that CPU as the group's init time. If any
    /// allocation fails, everything already allocated is dropped.
    pub fn try_new(
        id: GroupId,
        parent: Option<Arc<CpuacctGroup>>,
        nr_cpus: usize,
        clock: &dyn ClockSource,
    ) -> CpuacctResult<Self> {
        let parent_id = parent.as_ref().map(|parent| parent.id());
        let group = Self {
            id,
            parent,
            bank: PerCpuCounterBank::try_new(nr_cpus)?,
            cursors: PerCpu::try_new_with(nr_cpus, |_| ReconciliationState::new())?,
            windows: IdleWindowTracker::try_new(nr_cpus, |cpu| clock.cpu_clock(cpu))?,
            migrations: MigrationTracker::try_new(nr_cpus)?,
        };

        log::debug!(
            "cpuacct: allocated group {} (parent {:?}) for {} CPUs",
            id,
            parent_id,
            nr_cpus
        );
        Ok(group)
    }

    /// Allocate the root group
    pub fn new_root(nr_cpus: usize, clock: &dyn ClockSource) -> CpuacctResult<Self> {
        Self::try_new(GroupId::ROOT, None, nr_cpus, clock)
    }

    /// Group identifier
    #[inline]
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Parent group identifier, `None` for the root
    #[inline]
    pub fn parent(&self) -> Option<GroupId> {
        self.parent.as_ref().map(|parent| parent.id())
    }

    /// Parent group, `None` for the root
    #[inline]
    pub fn parent_group(&self) -> Option<&Arc<CpuacctGroup>> {
        self.parent.as_ref()
    }

    /// This group followed by every ancestor up to the root
    pub fn ancestors(&self) -> impl Iterator<Item = &CpuacctGroup> {
        core::iter::successors(Some(self), |group| group.parent.as_deref())
    }

    /// Whether this is the root group
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of possible CPUs covered
    #[inline]
    pub fn nr_cpus(&self) -> usize {
        self.bank.nr_cpus()
    }

    /// Counter bank
    #[inline]
    pub fn bank(&self) -> &PerCpuCounterBank {
        &self.bank
    }

    /// Reconciliation cursors of `cpu`
    #[inline]
    pub fn cursors(&self, cpu: CpuId) -> &ReconciliationState {
        self.cursors.get(cpu)
    }

    /// Idle windows
    #[inline]
    pub fn windows(&self) -> &IdleWindowTracker {
        &self.windows
    }

    /// Migration counters
    #[inline]
    pub fn migrations(&self) -> &MigrationTracker {
        &self.migrations
    }

    /// Iterate over every possible CPU
    pub fn cpus(&self) -> impl Iterator<Item = CpuId> {
        (0..self.nr_cpus() as u32).map(CpuId)
    }

    /// Zero the counter bank and the reconciliation cursors on every CPU.
    ///
    /// Migration counts, windows and raw execution time are kept.
    pub fn reset(&self) {
        for cpu in self.cpus() {
            self.bank.reset(cpu);
            self.cursors.get(cpu).reset();
        }
    }
}

impl fmt::Debug for CpuacctGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuacctGroup")
            .field("id", &self.id)
            .field("parent", &self.parent())
            .field("nr_cpus", &self.nr_cpus())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
