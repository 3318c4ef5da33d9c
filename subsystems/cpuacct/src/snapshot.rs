//! # Snapshot Reader
//!
//! Builds the per-group summary reported to monitoring consumers.
//!
//! For the root group every figure comes from the kernel-wide table, which
//! is already authoritative. For any other group each CPU contributes:
//!
//! - user / nice / system: the high-resolution usage split by the two
//!   reconciliation cursors using the group's tick samples
//! - idle / iowait / steal: the group's idle windows on that CPU
//! - irq / softirq / guest / guest_nice: the group's own cpustat table
//! - migrations: the group's migration counter
//!
//! Reading advances the reconciliation cursors, so two reads never report
//! a smaller value for the same CPU.

use alloc::sync::Arc;
use core::fmt;
use core::ops::AddAssign;

use crate::clock::ClockSource;
use crate::config::CpuacctConfig;
use crate::cpu::CpuId;
use crate::error::{CpuacctError, CpuacctResult};
use crate::group::CpuacctGroup;
use crate::kstat::KernelStat;
use crate::stat::CpuTimeIndex;

/// Summary of one group, in nanoseconds unless converted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// User time
    pub user: u64,
    /// Niced user time
    pub nice: u64,
    /// System time
    pub system: u64,
    /// Idle time, excluding iowait
    pub idle: u64,
    /// Iowait time
    pub iowait: u64,
    /// Hard interrupt time
    pub irq: u64,
    /// Soft interrupt time
    pub softirq: u64,
    /// Steal time
    pub steal: u64,
    /// Guest time
    pub guest: u64,
    /// Niced guest time
    pub guest_nice: u64,
    /// Migrations into the group (a count, never converted)
    pub migrations: u64,
}

impl UsageSnapshot {
    /// Convert every time field to external clock ticks
    pub fn to_clock_t(&self, config: &CpuacctConfig) -> Self {
        let conv = |ns| config.nsec_to_clock_t(ns);
        Self {
            user: conv(self.user),
            nice: conv(self.nice),
            system: conv(self.system),
            idle: conv(self.idle),
            iowait: conv(self.iowait),
            irq: conv(self.irq),
            softirq: conv(self.softirq),
            steal: conv(self.steal),
            guest: conv(self.guest),
            guest_nice: conv(self.guest_nice),
            migrations: self.migrations,
        }
    }

    /// Sum of all time fields except guest time, which is already part of
    /// user time
    pub fn total(&self) -> u64 {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .iter()
        .fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

impl AddAssign for UsageSnapshot {
    fn add_assign(&mut self, rhs: Self) {
        self.user = self.user.wrapping_add(rhs.user);
        self.nice = self.nice.wrapping_add(rhs.nice);
        self.system = self.system.wrapping_add(rhs.system);
        self.idle = self.idle.wrapping_add(rhs.idle);
        self.iowait = self.iowait.wrapping_add(rhs.iowait);
        self.irq = self.irq.wrapping_add(rhs.irq);
        self.softirq = self.softirq.wrapping_add(rhs.softirq);
        self.steal = self.steal.wrapping_add(rhs.steal);
        self.guest = self.guest.wrapping_add(rhs.guest);
        self.guest_nice = self.guest_nice.wrapping_add(rhs.guest_nice);
        self.migrations = self.migrations.wrapping_add(rhs.migrations);
    }
}

/// Tick-sampled user / system summary of the `stat` file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuacctStat {
    /// User plus nice time
    pub user: u64,
    /// System, irq and softirq time
    pub system: u64,
}

/// Consistent reader of group summaries
pub struct SnapshotReader {
    config: CpuacctConfig,
    kstat: Arc<dyn KernelStat>,
    clock: Arc<dyn ClockSource>,
}

impl SnapshotReader {
    /// Reader using `kstat` for root figures and `clock` for open windows.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        config: CpuacctConfig,
        kstat: Arc<dyn KernelStat>,
        clock: Arc<dyn ClockSource>,
    ) -> CpuacctResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            kstat,
            clock,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &CpuacctConfig {
        &self.config
    }

    /// Summary of `group` with open windows extended to `now` on every CPU.
    ///
    /// Non-root groups only sum housekeeping CPUs.
    pub fn read(&self, group: &CpuacctGroup, now: u64) -> UsageSnapshot {
        self.read_with(group, |_| now)
    }

    /// Summary of `group` with open windows extended to each CPU's clock
    pub fn read_now(&self, group: &CpuacctGroup) -> UsageSnapshot {
        self.read_with(group, |cpu| self.clock.cpu_clock(cpu))
    }

    fn read_with<F>(&self, group: &CpuacctGroup, mut now: F) -> UsageSnapshot
    where
        F: FnMut(CpuId) -> u64,
    {
        let mut total = UsageSnapshot::default();
        for cpu in group.cpus() {
            if !group.is_root() && !self.config.is_housekeeping(cpu) {
                continue;
            }
            total += self.cpu_result(group, cpu, now(cpu));
        }
        total
    }

    /// Contribution of one CPU to the summary of `group`
    pub fn cpu_result(&self, group: &CpuacctGroup, cpu: CpuId, now: u64) -> UsageSnapshot {
        if group.is_root() {
            return self.root_cpu_result(group, cpu);
        }

        let bank = group.bank();
        let times = group.cursors(cpu).reconcile(
            bank.read_all(cpu),
            bank.cpustat(cpu, CpuTimeIndex::User),
            bank.cpustat(cpu, CpuTimeIndex::Nice),
            bank.cpustat(cpu, CpuTimeIndex::System),
        );

        let mut res = UsageSnapshot {
            user: times.user,
            nice: times.nice,
            system: times.system,
            irq: bank.cpustat(cpu, CpuTimeIndex::Irq),
            softirq: bank.cpustat(cpu, CpuTimeIndex::Softirq),
            guest: bank.cpustat(cpu, CpuTimeIndex::Guest),
            guest_nice: bank.cpustat(cpu, CpuTimeIndex::GuestNice),
            migrations: group.migrations().read(cpu),
            ..UsageSnapshot::default()
        };

        if self.config.schedstats() {
            let window = group.windows().cpu(cpu);
            let snap = window.snapshot(now);
            res.idle = snap.idle;
            res.iowait = snap.iowait;
            res.steal = window.steal(&snap, now);
        }

        res
    }

    fn root_cpu_result(&self, root: &CpuacctGroup, cpu: CpuId) -> UsageSnapshot {
        let kstat = &*self.kstat;
        UsageSnapshot {
            user: kstat.cpustat(cpu, CpuTimeIndex::User),
            nice: kstat.cpustat(cpu, CpuTimeIndex::Nice),
            system: kstat.cpustat(cpu, CpuTimeIndex::System),
            idle: kstat.idle_time(cpu),
            iowait: kstat.iowait_time(cpu),
            irq: kstat.cpustat(cpu, CpuTimeIndex::Irq),
            softirq: kstat.cpustat(cpu, CpuTimeIndex::Softirq),
            steal: kstat.cpustat(cpu, CpuTimeIndex::Steal),
            guest: kstat.cpustat(cpu, CpuTimeIndex::Guest),
            guest_nice: kstat.cpustat(cpu, CpuTimeIndex::GuestNice),
            migrations: root.migrations().read(cpu),
        }
    }

    /// Tick-sampled user / system summary of `group`, in nanoseconds
    pub fn stat(&self, group: &CpuacctGroup) -> CpuacctStat {
        let field = |cpu: CpuId, index: CpuTimeIndex| {
            if group.is_root() {
                self.kstat.cpustat(cpu, index)
            } else {
                group.bank().cpustat(cpu, index)
            }
        };

        group.cpus().fold(CpuacctStat::default(), |mut acc, cpu| {
            acc.user = acc
                .user
                .wrapping_add(field(cpu, CpuTimeIndex::User))
                .wrapping_add(field(cpu, CpuTimeIndex::Nice));
            acc.system = acc
                .system
                .wrapping_add(field(cpu, CpuTimeIndex::System))
                .wrapping_add(field(cpu, CpuTimeIndex::Irq))
                .wrapping_add(field(cpu, CpuTimeIndex::Softirq));
            acc
        })
    }

    /// Reset the counters of `group`.
    ///
    /// Only `0` is accepted; any other value is rejected without touching
    /// the group.
    pub fn reset(&self, group: &CpuacctGroup, val: u64) -> CpuacctResult<()> {
        if val != 0 {
            log::warn!(
                "cpuacct: rejected reset of group {} to {}",
                group.id(),
                val
            );
            return Err(CpuacctError::InvalidArgument {
                param: "usage",
                reason: "only 0 resets the counters",
            });
        }

        group.reset();
        log::info!("cpuacct: reset usage of group {}", group.id());
        Ok(())
    }
}

impl fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotReader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
