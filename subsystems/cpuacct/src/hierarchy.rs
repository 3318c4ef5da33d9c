//! # Group Hierarchy
//!
//! The accounting core only needs to resolve a task to its group and a group
//! to its parent. [`Hierarchy`] is that contract; [`GroupRegistry`] is the
//! in-kernel implementation that also owns group lifecycle.
//!
//! ## Reclamation
//!
//! Groups are handed out as `Arc<CpuacctGroup>`. Destroying a group only
//! unlinks it from the registry; a CPU that resolved the group before the
//! unlink keeps its reference until its charge finishes, and the per-CPU
//! storage is freed when the last reference drops.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use crate::clock::ClockSource;
use crate::error::{CpuacctError, CpuacctResult};
use crate::group::{CpuacctGroup, GroupId, TaskId};

/// Resolution of tasks and groups consumed by the accounting core
pub trait Hierarchy: Send + Sync {
    /// Parent of a group; `None` for the root or an unknown group
    fn parent_of(&self, group: GroupId) -> Option<GroupId>;

    /// Accounting state of a group
    fn group(&self, group: GroupId) -> Option<Arc<CpuacctGroup>>;

    /// Group a task is currently attached to
    fn group_of(&self, task: TaskId) -> Option<GroupId>;

    /// Accounting state of the group a task is attached to
    fn task_group(&self, task: TaskId) -> Option<Arc<CpuacctGroup>> {
        self.group_of(task).and_then(|id| self.group(id))
    }
}

#[derive(Debug)]
struct GroupNode {
    group: Arc<CpuacctGroup>,
    children: BTreeSet<GroupId>,
    nr_tasks: usize,
}

#[derive(Debug, Default)]
struct Tables {
    groups: BTreeMap<GroupId, GroupNode>,
    tasks: BTreeMap<TaskId, GroupId>,
}

/// Registry of live groups and task membership
#[derive(Debug)]
pub struct GroupRegistry {
    root: Arc<CpuacctGroup>,
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    nr_cpus: usize,
}

impl GroupRegistry {
    /// Registry containing only `root`
    pub fn new(root: Arc<CpuacctGroup>) -> Self {
        let nr_cpus = root.nr_cpus();
        let mut tables = Tables::default();
        tables.groups.insert(
            root.id(),
            GroupNode {
                group: Arc::clone(&root),
                children: BTreeSet::new(),
                nr_tasks: 0,
            },
        );

        Self {
            root,
            tables: RwLock::new(tables),
            next_id: AtomicU64::new(GroupId::ROOT.0 + 1),
            nr_cpus,
        }
    }

    /// Root group
    pub fn root(&self) -> &Arc<CpuacctGroup> {
        &self.root
    }

    /// Create a group below `parent`.
    ///
    /// Per-CPU storage is allocated before the group becomes visible, so a
    /// failed allocation leaves the registry untouched.
    pub fn create_group(
        &self,
        parent: GroupId,
        clock: &dyn ClockSource,
    ) -> CpuacctResult<Arc<CpuacctGroup>> {
        let parent_group = self
            .group(parent)
            .ok_or(CpuacctError::GroupNotFound(parent))?;

        let id = GroupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let group = match CpuacctGroup::try_new(id, Some(parent_group), self.nr_cpus, clock) {
            Ok(group) => Arc::new(group),
            Err(err) => {
                log::error!("cpuacct: failed to create group below {}: {}", parent, err);
                return Err(err);
            },
        };

        let mut tables = self.tables.write();
        // The parent may have been destroyed while we were allocating
        let parent_node = tables
            .groups
            .get_mut(&parent)
            .ok_or(CpuacctError::GroupNotFound(parent))?;
        parent_node.children.insert(id);
        tables.groups.insert(
            id,
            GroupNode {
                group: Arc::clone(&group),
                children: BTreeSet::new(),
                nr_tasks: 0,
            },
        );

        log::info!("cpuacct: created group {} below {}", id, parent);
        Ok(group)
    }

    /// Unlink a group.
    ///
    /// The root, groups with children and groups with attached tasks cannot
    /// be destroyed. Storage is reclaimed once in-flight users drop their
    /// references.
    pub fn destroy_group(&self, id: GroupId) -> CpuacctResult<()> {
        if id.is_root() {
            return Err(CpuacctError::RootGroup);
        }

        let mut tables = self.tables.write();
        let node = tables
            .groups
            .get(&id)
            .ok_or(CpuacctError::GroupNotFound(id))?;
        if !node.children.is_empty() || node.nr_tasks != 0 {
            log::warn!("cpuacct: refusing to destroy busy group {}", id);
            return Err(CpuacctError::GroupBusy(id));
        }
        let parent = node.group.parent();

        tables.groups.remove(&id);
        if let Some(parent) = parent.and_then(|p| tables.groups.get_mut(&p)) {
            parent.children.remove(&id);
        }

        log::info!("cpuacct: destroyed group {}", id);
        Ok(())
    }

    /// Attach a task to a group, moving it out of its previous group.
    ///
    /// Returns the previous group, if any.
    pub fn attach_task(&self, task: TaskId, group: GroupId) -> CpuacctResult<Option<GroupId>> {
        let mut tables = self.tables.write();
        let node = tables
            .groups
            .get_mut(&group)
            .ok_or(CpuacctError::GroupNotFound(group))?;
        node.nr_tasks += 1;

        let previous = tables.tasks.insert(task, group);
        if let Some(node) = previous.and_then(|prev| tables.groups.get_mut(&prev)) {
            node.nr_tasks -= 1;
        }

        log::debug!("cpuacct: task {} attached to group {}", task, group);
        Ok(previous)
    }

    /// Detach a task from its group
    pub fn detach_task(&self, task: TaskId) -> CpuacctResult<GroupId> {
        let mut tables = self.tables.write();
        let group = tables
            .tasks
            .remove(&task)
            .ok_or(CpuacctError::TaskNotFound(task))?;
        if let Some(node) = tables.groups.get_mut(&group) {
            node.nr_tasks -= 1;
        }

        log::debug!("cpuacct: task {} detached from group {}", task, group);
        Ok(group)
    }

    /// Direct children of a group
    pub fn children_of(&self, group: GroupId) -> CpuacctResult<Vec<GroupId>> {
        let tables = self.tables.read();
        let node = tables
            .groups
            .get(&group)
            .ok_or(CpuacctError::GroupNotFound(group))?;
        Ok(node.children.iter().copied().collect())
    }

    /// Number of tasks attached to a group
    pub fn nr_tasks(&self, group: GroupId) -> CpuacctResult<usize> {
        let tables = self.tables.read();
        tables
            .groups
            .get(&group)
            .map(|node| node.nr_tasks)
            .ok_or(CpuacctError::GroupNotFound(group))
    }

    /// Number of live groups, root included
    pub fn len(&self) -> usize {
        self.tables.read().groups.len()
    }

    /// Whether only the root exists
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }
}

impl Hierarchy for GroupRegistry {
    fn parent_of(&self, group: GroupId) -> Option<GroupId> {
        self.tables
            .read()
            .groups
            .get(&group)
            .and_then(|node| node.group.parent())
    }

    fn group(&self, group: GroupId) -> Option<Arc<CpuacctGroup>> {
        self.tables
            .read()
            .groups
            .get(&group)
            .map(|node| Arc::clone(&node.group))
    }

    fn group_of(&self, task: TaskId) -> Option<GroupId> {
        self.tables.read().tasks.get(&task).copied()
    }

    fn task_group(&self, task: TaskId) -> Option<Arc<CpuacctGroup>> {
        let tables = self.tables.read();
        let id = tables.tasks.get(&task)?;
        tables.groups.get(id).map(|node| Arc::clone(&node.group))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry(clock: &ManualClock) -> GroupRegistry {
        GroupRegistry::new(Arc::new(CpuacctGroup::new_root(2, clock).unwrap()))
    }

    #[test]
    fn test_create_links_parent_and_child() {
        let clock = ManualClock::new(0);
        let reg = registry(&clock);

        let a = reg.create_group(GroupId::ROOT, &clock).unwrap();
        let b = reg.create_group(a.id(), &clock).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(reg.parent_of(b.id()), Some(a.id()));
        assert_eq!(reg.parent_of(a.id()), Some(GroupId::ROOT));
        assert_eq!(reg.parent_of(GroupId::ROOT), None);
        assert_eq!(reg.children_of(GroupId::ROOT).unwrap(), [a.id()]);
        assert_eq!(reg.len(), 3);
        assert!(!reg.is_empty());
    }

    #[test]
    fn test_create_under_unknown_parent() {
        let clock = ManualClock::new(0);
        let reg = registry(&clock);
        assert_eq!(
            reg.create_group(GroupId(99), &clock).unwrap_err(),
            CpuacctError::GroupNotFound(GroupId(99))
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_destroy_rules() {
        let clock = ManualClock::new(0);
        let reg = registry(&clock);
        let a = reg.create_group(GroupId::ROOT, &clock).unwrap();
        let b = reg.create_group(a.id(), &clock).unwrap();

        assert_eq!(reg.destroy_group(GroupId::ROOT), Err(CpuacctError::RootGroup));
        assert_eq!(reg.destroy_group(a.id()), Err(CpuacctError::GroupBusy(a.id())));

        reg.attach_task(TaskId(1), b.id()).unwrap();
        assert_eq!(reg.destroy_group(b.id()), Err(CpuacctError::GroupBusy(b.id())));
        reg.detach_task(TaskId(1)).unwrap();

        assert_eq!(reg.destroy_group(b.id()), Ok(()));
        assert_eq!(reg.destroy_group(a.id()), Ok(()));
        assert_eq!(
            reg.destroy_group(a.id()),
            Err(CpuacctError::GroupNotFound(a.id()))
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_destroyed_group_outlives_in_flight_users() {
        let clock = ManualClock::new(0);
        let reg = registry(&clock);
        let a = reg.create_group(GroupId::ROOT, &clock).unwrap();
        let in_flight = reg.group(a.id()).unwrap();
        drop(a);

        reg.destroy_group(in_flight.id()).unwrap();
        assert!(reg.group(in_flight.id()).is_none());
        // Still usable until the last reference drops
        assert_eq!(in_flight.bank().read_all(crate::cpu::CpuId(1)), 0);
        assert_eq!(Arc::strong_count(&in_flight), 1);
    }

    #[test]
    fn test_parent_walk_skips_registry_lock() {
        use crate::accounting::HierarchicalAggregator;
        use crate::config::CpuacctConfig;
        use crate::cpu::CpuId;
        use crate::stat::{Category, UsageIndex};

        let clock = ManualClock::new(0);
        let reg = Arc::new(registry(&clock));
        let a = reg.create_group(GroupId::ROOT, &clock).unwrap();
        let b = reg.create_group(a.id(), &clock).unwrap();
        let agg = HierarchicalAggregator::new(CpuacctConfig::new(2), reg.clone()).unwrap();
        let user = Category::Usage(UsageIndex::User);

        let tables = reg.tables.write();
        agg.charge_group(&b, CpuId(0), 9, user);
        drop(tables);

        assert_eq!(a.bank().read(CpuId(0), user), 9);
        assert_eq!(reg.root().bank().read(CpuId(0), user), 9);
    }

    #[test]
    fn test_task_group_resolves_state() {
        let clock = ManualClock::new(0);
        let reg = registry(&clock);
        let a = reg.create_group(GroupId::ROOT, &clock).unwrap();
        reg.attach_task(TaskId(7), a.id()).unwrap();

        assert!(Arc::ptr_eq(&reg.task_group(TaskId(7)).unwrap(), &a));
        assert!(reg.task_group(TaskId(8)).is_none());
    }

    #[test]
    fn test_task_membership() {
        let clock = ManualClock::new(0);
        let reg = registry(&clock);
        let a = reg.create_group(GroupId::ROOT, &clock).unwrap();

        assert_eq!(reg.group_of(TaskId(5)), None);
        assert_eq!(reg.attach_task(TaskId(5), GroupId::ROOT), Ok(None));
        assert_eq!(reg.attach_task(TaskId(5), a.id()), Ok(Some(GroupId::ROOT)));
        assert_eq!(reg.group_of(TaskId(5)), Some(a.id()));
        assert_eq!(reg.nr_tasks(GroupId::ROOT), Ok(0));
        assert_eq!(reg.nr_tasks(a.id()), Ok(1));

        assert_eq!(reg.detach_task(TaskId(5)), Ok(a.id()));
        assert_eq!(
            reg.detach_task(TaskId(5)),
            Err(CpuacctError::TaskNotFound(TaskId(5)))
        );
        assert_eq!(
            reg.attach_task(TaskId(6), GroupId(42)),
            Err(CpuacctError::GroupNotFound(GroupId(42)))
        );
    }
}
