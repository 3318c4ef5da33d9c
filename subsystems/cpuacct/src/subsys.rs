//! # CPU Accounting Subsystem
//!
//! Wires the accounting core together: the root group, the group registry,
//! the aggregator driven by the scheduler and the reader behind the control
//! files. The root is constructed here and injected into everything else,
//! so independent instances can coexist.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::accounting::HierarchicalAggregator;
use crate::clock::ClockSource;
use crate::config::CpuacctConfig;
use crate::cpu::{CpuId, CpuMask};
use crate::error::{CpuacctError, CpuacctResult};
use crate::group::{CpuacctGroup, GroupId, TaskId};
use crate::hierarchy::{GroupRegistry, Hierarchy};
use crate::kstat::KernelStat;
use crate::report::{self, CpuacctFile};
use crate::snapshot::{SnapshotReader, UsageSnapshot};

/// The CPU accounting subsystem
pub struct CpuacctSubsys {
    config: CpuacctConfig,
    clock: Arc<dyn ClockSource>,
    registry: Arc<GroupRegistry>,
    aggregator: HierarchicalAggregator,
    reader: SnapshotReader,
}

impl CpuacctSubsys {
    /// Validate `config` and build the subsystem with a fresh root group
    pub fn new(
        config: CpuacctConfig,
        kstat: Arc<dyn KernelStat>,
        clock: Arc<dyn ClockSource>,
    ) -> CpuacctResult<Self> {
        if let Err(err) = config.validate() {
            log::error!("cpuacct: invalid configuration: {}", err);
            return Err(err);
        }

        let root = Arc::new(CpuacctGroup::new_root(config.nr_cpus, &*clock)?);
        let registry = Arc::new(GroupRegistry::new(root));
        let hierarchy: Arc<dyn Hierarchy> = registry.clone();
        let aggregator = HierarchicalAggregator::new(config, hierarchy)?;
        let reader = SnapshotReader::new(config, kstat, Arc::clone(&clock))?;

        log::info!(
            "cpuacct: initialized for {} CPUs (USER_HZ={}, features {:?})",
            config.nr_cpus,
            config.user_hz,
            config.features
        );

        Ok(Self {
            config,
            aggregator,
            reader,
            clock,
            registry,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &CpuacctConfig {
        &self.config
    }

    /// Charge path used by the scheduler
    pub fn aggregator(&self) -> &HierarchicalAggregator {
        &self.aggregator
    }

    /// Summary reader
    pub fn reader(&self) -> &SnapshotReader {
        &self.reader
    }

    /// Group registry
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Root group
    pub fn root(&self) -> &Arc<CpuacctGroup> {
        self.registry.root()
    }

    /// Look a live group up
    pub fn group(&self, id: GroupId) -> CpuacctResult<Arc<CpuacctGroup>> {
        self.registry
            .group(id)
            .ok_or(CpuacctError::GroupNotFound(id))
    }

    /// Create a group below `parent`
    pub fn create_group(&self, parent: GroupId) -> CpuacctResult<GroupId> {
        self.registry
            .create_group(parent, &*self.clock)
            .map(|group| group.id())
    }

    /// Destroy an empty, childless group
    pub fn destroy_group(&self, id: GroupId) -> CpuacctResult<()> {
        self.registry.destroy_group(id)
    }

    /// Move a task into a group
    pub fn attach_task(&self, task: TaskId, group: GroupId) -> CpuacctResult<()> {
        self.registry.attach_task(task, group).map(|_| ())
    }

    /// Remove a task from its group
    pub fn detach_task(&self, task: TaskId) -> CpuacctResult<()> {
        self.registry.detach_task(task).map(|_| ())
    }

    fn check_cpu(&self, cpu: CpuId) -> CpuacctResult<()> {
        if cpu.index() < self.config.nr_cpus {
            Ok(())
        } else {
            Err(CpuacctError::InvalidCpu(cpu))
        }
    }

    /// `cpu` went idle for `group`
    pub fn idle_start(&self, group: GroupId, cpu: CpuId) -> CpuacctResult<()> {
        self.check_cpu(cpu)?;
        let group = self.group(group)?;
        self.aggregator
            .idle_start(&group, cpu, self.clock.cpu_clock(cpu));
        Ok(())
    }

    /// `cpu` stopped being idle for `group`
    pub fn idle_end(&self, group: GroupId, cpu: CpuId) -> CpuacctResult<()> {
        self.check_cpu(cpu)?;
        let group = self.group(group)?;
        self.aggregator
            .idle_end(&group, cpu, self.clock.cpu_clock(cpu));
        Ok(())
    }

    /// A task of `group` on `cpu` blocked on I/O
    pub fn iowait_enter(&self, group: GroupId, cpu: CpuId) -> CpuacctResult<()> {
        self.check_cpu(cpu)?;
        let group = self.group(group)?;
        self.aggregator
            .iowait_enter(&group, cpu, self.clock.cpu_clock(cpu));
        Ok(())
    }

    /// A task of `group` on `cpu` finished waiting on I/O
    pub fn iowait_exit(&self, group: GroupId, cpu: CpuId) -> CpuacctResult<()> {
        self.check_cpu(cpu)?;
        let group = self.group(group)?;
        self.aggregator
            .iowait_exit(&group, cpu, self.clock.cpu_clock(cpu));
        Ok(())
    }

    /// The CPUs assigned to `group` changed
    pub fn cpuset_changed(
        &self,
        group: GroupId,
        deleted: Option<&CpuMask>,
        added: Option<&CpuMask>,
    ) -> CpuacctResult<()> {
        let group = self.group(group)?;
        self.aggregator
            .cpuset_changed(&group, deleted, added, &*self.clock);
        Ok(())
    }

    /// Summary of a group at the current time, in nanoseconds
    pub fn read(&self, group: GroupId) -> CpuacctResult<UsageSnapshot> {
        let group = self.group(group)?;
        Ok(self.reader.read_now(&group))
    }

    /// Render a control file of a group
    pub fn read_file(&self, group: GroupId, name: &str) -> CpuacctResult<String> {
        let file = CpuacctFile::from_name(name)?;
        let group = self.group(group)?;
        let mut out = String::new();
        report::show(file, &self.reader, &group, &mut out)?;
        Ok(out)
    }

    /// Write a value to a control file of a group
    pub fn write_file(&self, group: GroupId, name: &str, val: u64) -> CpuacctResult<()> {
        let file = CpuacctFile::from_name(name)?;
        let group = self.group(group)?;
        report::write_u64(file, &self.reader, &group, val)
    }
}

impl fmt::Debug for CpuacctSubsys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuacctSubsys")
            .field("config", &self.config)
            .field("groups", &self.registry.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
