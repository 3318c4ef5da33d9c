//! # Per-CPU Counter Bank
//!
//! Raw accumulated time of one group, sharded per CPU. Each shard holds the
//! high-resolution usage counters and the group's tick-sampled cpustat
//! table. A shard is written only by its own CPU; other CPUs read it with
//! relaxed loads and may observe a value that is a few charges old.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::cpu::{CpuId, PerCpu};
use crate::error::CpuacctResult;
use crate::stat::{Category, CpuTimeIndex, UsageIndex, NR_CPUTIME_STATS, NR_USAGE_STATS};

/// Counters of one (CPU, group) pair
#[derive(Debug, Default)]
pub struct CounterShard {
    usages: [AtomicU64; NR_USAGE_STATS],
    cpustat: [AtomicU64; NR_CPUTIME_STATS],
}

impl CounterShard {
    #[inline]
    fn counter(&self, category: Category) -> &AtomicU64 {
        match category {
            Category::Usage(idx) => &self.usages[idx.index()],
            Category::Cpustat(idx) => &self.cpustat[idx.index()],
        }
    }
}

/// Per-CPU counter bank of one group
#[derive(Debug)]
pub struct PerCpuCounterBank {
    shards: PerCpu<CounterShard>,
}

impl PerCpuCounterBank {
    /// Allocate a zeroed bank for `nr_cpus` CPUs
    pub fn try_new(nr_cpus: usize) -> CpuacctResult<Self> {
        Ok(Self {
            shards: PerCpu::try_new_with(nr_cpus, |_| CounterShard::default())?,
        })
    }

    /// Number of possible CPUs covered
    #[inline]
    pub fn nr_cpus(&self) -> usize {
        self.shards.nr_cpus()
    }

    /// Add `amount` to a category on `cpu`.
    ///
    /// Must be called by `cpu` itself. Never blocks.
    #[inline]
    pub fn charge(&self, cpu: CpuId, category: Category, amount: u64) {
        self.shards
            .get(cpu)
            .counter(category)
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value of a category on `cpu`
    #[inline]
    pub fn read(&self, cpu: CpuId, category: Category) -> u64 {
        self.shards.get(cpu).counter(category).load(Ordering::Relaxed)
    }

    /// High-resolution usage counter on `cpu`
    #[inline]
    pub fn usage(&self, cpu: CpuId, index: UsageIndex) -> u64 {
        self.read(cpu, Category::Usage(index))
    }

    /// Tick-sampled cpustat counter on `cpu`
    #[inline]
    pub fn cpustat(&self, cpu: CpuId, index: CpuTimeIndex) -> u64 {
        self.read(cpu, Category::Cpustat(index))
    }

    /// Sum of all usage counters on `cpu` (total execution time)
    pub fn read_all(&self, cpu: CpuId) -> u64 {
        let shard = self.shards.get(cpu);
        shard
            .usages
            .iter()
            .fold(0u64, |acc, c| acc.wrapping_add(c.load(Ordering::Relaxed)))
    }

    /// Zero every category on `cpu`.
    ///
    /// This is the only write allowed from a CPU other than the owner; the
    /// caller must hold the owner's run-queue lock so no charge is in flight.
    pub fn reset(&self, cpu: CpuId) {
        let shard = self.shards.get(cpu);
        for counter in shard.usages.iter().chain(shard.cpustat.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    const USER: Category = Category::Usage(UsageIndex::User);
    const SYSTEM: Category = Category::Usage(UsageIndex::System);

    #[test]
    fn test_charge_and_read() {
        let bank = PerCpuCounterBank::try_new(2).unwrap();
        bank.charge(CpuId(0), USER, 100);
        bank.charge(CpuId(0), SYSTEM, 50);
        bank.charge(CpuId(1), USER, 7);
        bank.charge(CpuId(0), Category::Cpustat(CpuTimeIndex::Irq), 3);

        assert_eq!(bank.read(CpuId(0), USER), 100);
        assert_eq!(bank.usage(CpuId(0), UsageIndex::System), 50);
        assert_eq!(bank.read_all(CpuId(0)), 150);
        assert_eq!(bank.read_all(CpuId(1)), 7);
        assert_eq!(bank.cpustat(CpuId(0), CpuTimeIndex::Irq), 3);
    }

    #[test]
    fn test_reset_zeroes_all_categories() {
        let bank = PerCpuCounterBank::try_new(2).unwrap();
        bank.charge(CpuId(1), USER, 10);
        bank.charge(CpuId(1), Category::Cpustat(CpuTimeIndex::Guest), 10);
        bank.charge(CpuId(0), USER, 5);

        bank.reset(CpuId(1));
        assert_eq!(bank.read_all(CpuId(1)), 0);
        for idx in CpuTimeIndex::ALL {
            assert_eq!(bank.cpustat(CpuId(1), idx), 0);
        }
        assert_eq!(bank.read(CpuId(0), USER), 5);
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let bank = Arc::new(PerCpuCounterBank::try_new(4).unwrap());
        let handles: Vec<_> = (0..4u32)
            .map(|cpu| {
                let bank = Arc::clone(&bank);
                thread::spawn(move || {
                    for i in 0..10_000u64 {
                        bank.charge(CpuId(cpu), USER, i % 7);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let expected: u64 = (0..10_000u64).map(|i| i % 7).sum();
        for cpu in 0..4 {
            assert_eq!(bank.read(CpuId(cpu), USER), expected);
        }
    }
}
