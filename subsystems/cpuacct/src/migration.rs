//! # Migration Tracker
//!
//! Per-CPU count of task migrations into a group. Counts are per group and
//! never propagate to ancestors.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::cpu::{CpuId, PerCpu};
use crate::error::CpuacctResult;

/// Per-CPU migration counter of one group
#[derive(Debug)]
pub struct MigrationTracker {
    counts: PerCpu<AtomicU64>,
}

impl MigrationTracker {
    /// Allocate zeroed counters for `nr_cpus` CPUs
    pub fn try_new(nr_cpus: usize) -> CpuacctResult<Self> {
        Ok(Self {
            counts: PerCpu::try_new_with(nr_cpus, |_| AtomicU64::new(0))?,
        })
    }

    /// Record one migration executed on `cpu`
    #[inline]
    pub fn record(&self, cpu: CpuId) {
        self.counts.get(cpu).fetch_add(1, Ordering::Relaxed);
    }

    /// Migrations recorded on `cpu`
    #[inline]
    pub fn read(&self, cpu: CpuId) -> u64 {
        self.counts.get(cpu).load(Ordering::Relaxed)
    }

    /// Migrations across all CPUs
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .map(|(_, count)| count.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_per_cpu() {
        let tracker = MigrationTracker::try_new(3).unwrap();
        tracker.record(CpuId(0));
        tracker.record(CpuId(2));
        tracker.record(CpuId(2));

        assert_eq!(tracker.read(CpuId(0)), 1);
        assert_eq!(tracker.read(CpuId(1)), 0);
        assert_eq!(tracker.read(CpuId(2)), 2);
        assert_eq!(tracker.total(), 3);
    }
}
