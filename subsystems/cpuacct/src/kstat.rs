//! # Kernel-Wide CPU Statistics
//!
//! The machine-wide cpustat table maintained by the scheduler tick. The root
//! group reports straight from it instead of going through the reconciler
//! and window tracker, since these figures are already authoritative.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::cpu::{CpuId, PerCpu};
use crate::error::CpuacctResult;
use crate::stat::{CpuTimeIndex, NR_CPUTIME_STATS};

/// Source of kernel-wide per-CPU time figures
pub trait KernelStat: Send + Sync {
    /// Cpustat counter of `cpu` in nanoseconds
    fn cpustat(&self, cpu: CpuId, index: CpuTimeIndex) -> u64;

    /// Idle time of `cpu` in nanoseconds
    fn idle_time(&self, cpu: CpuId) -> u64 {
        self.cpustat(cpu, CpuTimeIndex::Idle)
    }

    /// Iowait time of `cpu` in nanoseconds
    fn iowait_time(&self, cpu: CpuId) -> u64 {
        self.cpustat(cpu, CpuTimeIndex::Iowait)
    }
}

/// In-kernel per-CPU cpustat table
#[derive(Debug)]
pub struct KernelCpustat {
    cpustat: PerCpu<[AtomicU64; NR_CPUTIME_STATS]>,
}

impl KernelCpustat {
    /// Allocate a zeroed table for `nr_cpus` CPUs
    pub fn try_new(nr_cpus: usize) -> CpuacctResult<Self> {
        Ok(Self {
            cpustat: PerCpu::try_new_with(nr_cpus, |_| Default::default())?,
        })
    }

    /// Account `delta` nanoseconds to a counter of `cpu`; called by `cpu`
    #[inline]
    pub fn account(&self, cpu: CpuId, index: CpuTimeIndex, delta: u64) {
        self.cpustat.get(cpu)[index.index()].fetch_add(delta, Ordering::Relaxed);
    }
}

impl KernelStat for KernelCpustat {
    fn cpustat(&self, cpu: CpuId, index: CpuTimeIndex) -> u64 {
        self.cpustat.get(cpu)[index.index()].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_and_read() {
        let kstat = KernelCpustat::try_new(2).unwrap();
        kstat.account(CpuId(1), CpuTimeIndex::Idle, 40);
        kstat.account(CpuId(1), CpuTimeIndex::Iowait, 4);
        kstat.account(CpuId(0), CpuTimeIndex::User, 9);

        assert_eq!(kstat.idle_time(CpuId(1)), 40);
        assert_eq!(kstat.iowait_time(CpuId(1)), 4);
        assert_eq!(kstat.cpustat(CpuId(0), CpuTimeIndex::User), 9);
        assert_eq!(kstat.cpustat(CpuId(0), CpuTimeIndex::Idle), 0);
    }
}
