//! # Hierarchical Aggregator
//!
//! Entry point of the scheduler into the accounting core. A charge resolves
//! the task's group once and then follows the parent links the groups hold
//! themselves, adding the amount to the current CPU's shard of every group on
//! the way.
//!
//! ```text
//!   task ──► leaf ──► parent ──► … ──► root
//!            usage:   every level including the root
//!            cpustat: every level below the root
//! ```
//!
//! The walk itself takes no lock over the tree and never allocates. A task
//! that cannot be resolved makes the charge a no-op.
//!
//! Window transitions are not hierarchical: the scheduler reports them for
//! each group whose entity on that CPU changes state.

use alloc::sync::Arc;
use core::fmt;

use crate::clock::ClockSource;
use crate::config::CpuacctConfig;
use crate::cpu::{CpuId, CpuMask};
use crate::error::CpuacctResult;
use crate::group::{CpuacctGroup, TaskId};
use crate::hierarchy::Hierarchy;
use crate::stat::{Category, CpuTimeIndex, ExecMode, UsageIndex};

/// Leaf-to-root charge walk and window transitions
pub struct HierarchicalAggregator {
    config: CpuacctConfig,
    hierarchy: Arc<dyn Hierarchy>,
}

impl HierarchicalAggregator {
    /// Aggregator resolving groups through `hierarchy`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: CpuacctConfig, hierarchy: Arc<dyn Hierarchy>) -> CpuacctResult<Self> {
        config.validate()?;
        Ok(Self { config, hierarchy })
    }

    /// Configuration in effect
    pub fn config(&self) -> &CpuacctConfig {
        &self.config
    }

    /// Charge `amount` to `category` on `cpu` for the group of `task` and
    /// its ancestors.
    ///
    /// Called by `cpu` with its run-queue lock held.
    pub fn charge(&self, task: TaskId, cpu: CpuId, amount: u64, category: Category) {
        if let Some(group) = self.hierarchy.task_group(task) {
            self.charge_group(&group, cpu, amount, category);
        }
    }

    /// Charge starting at `group` instead of a task's group
    pub fn charge_group(&self, group: &CpuacctGroup, cpu: CpuId, amount: u64, category: Category) {
        for group in group.ancestors() {
            if group.is_root() && !category.crosses_root() {
                return;
            }

            group.bank().charge(cpu, category, amount);
            if let Category::Usage(_) = category {
                group.windows().cpu(cpu).charge_exec(amount);
            }
        }
    }

    /// Charge high-resolution execution time in the given mode
    #[inline]
    pub fn charge_exec(&self, task: TaskId, cpu: CpuId, ns: u64, mode: ExecMode) {
        self.charge(task, cpu, ns, Category::Usage(UsageIndex::from(mode)));
    }

    /// Add a tick-sampled cpustat value; the root's table is left to the
    /// kernel-wide accounting
    #[inline]
    pub fn account_field(&self, task: TaskId, cpu: CpuId, index: CpuTimeIndex, val: u64) {
        self.charge(task, cpu, val, Category::Cpustat(index));
    }

    /// Count one migration of `task` onto `cpu`; not propagated to ancestors
    pub fn charge_migration(&self, task: TaskId, cpu: CpuId) {
        if let Some(group) = self.hierarchy.task_group(task) {
            group.migrations().record(cpu);
        }
    }

    /// Sum of a category over every possible CPU
    pub fn sum_across_cpus(&self, group: &CpuacctGroup, category: Category) -> u64 {
        group
            .cpus()
            .fold(0u64, |acc, cpu| acc.wrapping_add(group.bank().read(cpu, category)))
    }

    /// Total high-resolution usage over every possible CPU
    pub fn usage_total(&self, group: &CpuacctGroup) -> u64 {
        group
            .cpus()
            .fold(0u64, |acc, cpu| acc.wrapping_add(group.bank().read_all(cpu)))
    }

    /// `cpu` stopped running tasks of `group`
    pub fn idle_start(&self, group: &CpuacctGroup, cpu: CpuId, now: u64) {
        if self.config.schedstats() {
            group.windows().cpu(cpu).open_idle(now);
        }
    }

    /// `cpu` resumed running tasks of `group`
    pub fn idle_end(&self, group: &CpuacctGroup, cpu: CpuId, now: u64) {
        if self.config.schedstats() {
            group.windows().cpu(cpu).close_idle(now);
        }
    }

    /// A task of `group` on `cpu` blocked on I/O
    pub fn iowait_enter(&self, group: &CpuacctGroup, cpu: CpuId, now: u64) {
        if self.config.schedstats() {
            group.windows().cpu(cpu).open_iowait(now);
        }
    }

    /// A task of `group` on `cpu` finished waiting on I/O
    pub fn iowait_exit(&self, group: &CpuacctGroup, cpu: CpuId, now: u64) {
        if self.config.schedstats() {
            group.windows().cpu(cpu).close_iowait(now);
        }
    }

    /// The CPUs assigned to `group` changed.
    ///
    /// Added CPUs become idle for the group and end their ineffective window;
    /// deleted CPUs end their idle window and become ineffective.
    pub fn cpuset_changed(
        &self,
        group: &CpuacctGroup,
        deleted: Option<&CpuMask>,
        added: Option<&CpuMask>,
        clock: &dyn ClockSource,
    ) {
        if !self.config.schedstats() {
            return;
        }

        let nr_cpus = group.nr_cpus();
        if let Some(added) = added {
            for cpu in added.iter().filter(|cpu| cpu.index() < nr_cpus) {
                let now = clock.cpu_clock(cpu);
                let window = group.windows().cpu(cpu);
                window.close_ineffective(now);
                window.open_idle(now);
            }
        }
        if let Some(deleted) = deleted {
            for cpu in deleted.iter().filter(|cpu| cpu.index() < nr_cpus) {
                let now = clock.cpu_clock(cpu);
                let window = group.windows().cpu(cpu);
                window.close_idle(now);
                window.open_ineffective(now);
            }
        }

        log::debug!(
            "cpuacct: group {} cpuset changed (added {:?}, deleted {:?})",
            group.id(),
            added,
            deleted
        );
    }
}

impl fmt::Debug for HierarchicalAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalAggregator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
