//! # Accounting Categories
//!
//! Two families of per-CPU counters are kept for every group:
//!
//! - [`UsageIndex`]: high-resolution execution time, split by the mode the
//!   task was running in when it was charged
//! - [`CpuTimeIndex`]: tick-sampled time laid out like the kernel-wide
//!   cpustat table
//!
//! [`Category`] names one counter of either family.

use crate::error::CpuacctError;

// =============================================================================
// Usage Index
// =============================================================================

/// Number of high-resolution usage counters
pub const NR_USAGE_STATS: usize = 2;

/// High-resolution execution time counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum UsageIndex {
    /// Time executing in user mode
    User   = 0,
    /// Time executing in kernel mode
    System = 1,
}

impl UsageIndex {
    /// All usage counters in table order
    pub const ALL: [Self; NR_USAGE_STATS] = [Self::User, Self::System];

    /// Table index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name used in reports
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl TryFrom<usize> for UsageIndex {
    type Error = CpuacctError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(Self::User),
            1 => Ok(Self::System),
            _ => Err(CpuacctError::InvalidArgument {
                param: "usage_index",
                reason: "out of range",
            }),
        }
    }
}

/// Execution mode of the task being charged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Running user code
    User,
    /// Running kernel code
    Kernel,
}

impl From<ExecMode> for UsageIndex {
    fn from(mode: ExecMode) -> Self {
        match mode {
            ExecMode::User => UsageIndex::User,
            ExecMode::Kernel => UsageIndex::System,
        }
    }
}

// =============================================================================
// Cpustat Index
// =============================================================================

/// Number of tick-sampled cpustat counters
pub const NR_CPUTIME_STATS: usize = 10;

/// Tick-sampled cpustat counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CpuTimeIndex {
    /// User mode
    User      = 0,
    /// User mode at positive nice
    Nice      = 1,
    /// Kernel mode
    System    = 2,
    /// Softirq handling
    Softirq   = 3,
    /// Hardirq handling
    Irq       = 4,
    /// Idle
    Idle      = 5,
    /// Idle with tasks blocked on I/O
    Iowait    = 6,
    /// Stolen by the hypervisor
    Steal     = 7,
    /// Running a guest
    Guest     = 8,
    /// Running a niced guest
    GuestNice = 9,
}

impl CpuTimeIndex {
    /// All cpustat counters in table order
    pub const ALL: [Self; NR_CPUTIME_STATS] = [
        Self::User,
        Self::Nice,
        Self::System,
        Self::Softirq,
        Self::Irq,
        Self::Idle,
        Self::Iowait,
        Self::Steal,
        Self::Guest,
        Self::GuestNice,
    ];

    /// Table index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name used in reports
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Nice => "nice",
            Self::System => "system",
            Self::Softirq => "softirq",
            Self::Irq => "irq",
            Self::Idle => "idle",
            Self::Iowait => "iowait",
            Self::Steal => "steal",
            Self::Guest => "guest",
            Self::GuestNice => "guest_nice",
        }
    }
}

impl TryFrom<usize> for CpuTimeIndex {
    type Error = CpuacctError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(CpuacctError::InvalidArgument {
                param: "cpustat_index",
                reason: "out of range",
            })
    }
}

// =============================================================================
// Category
// =============================================================================

/// One counter of either family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// High-resolution usage counter
    Usage(UsageIndex),
    /// Tick-sampled cpustat counter
    Cpustat(CpuTimeIndex),
}

impl Category {
    /// Whether a charge to this category is applied to the root group too.
    ///
    /// The root's cpustat table is the kernel-wide one, maintained by the
    /// scheduler itself, so cpustat charges stop below the root.
    #[inline]
    pub const fn crosses_root(self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

impl From<UsageIndex> for Category {
    fn from(index: UsageIndex) -> Self {
        Self::Usage(index)
    }
}

impl From<CpuTimeIndex> for Category {
    fn from(index: CpuTimeIndex) -> Self {
        Self::Cpustat(index)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_indices_match_table_order() {
        for (i, idx) in CpuTimeIndex::ALL.iter().enumerate() {
            assert_eq!(idx.index(), i);
            assert_eq!(CpuTimeIndex::try_from(i), Ok(*idx));
        }
        for (i, idx) in UsageIndex::ALL.iter().enumerate() {
            assert_eq!(idx.index(), i);
            assert_eq!(UsageIndex::try_from(i), Ok(*idx));
        }
    }

    #[test]
    fn test_try_from_rejects_out_of_range() {
        assert!(UsageIndex::try_from(2).is_err());
        assert_eq!(CpuTimeIndex::try_from(4), Ok(CpuTimeIndex::Irq));
        assert!(CpuTimeIndex::try_from(10).is_err());
    }

    #[test]
    fn test_root_crossing() {
        assert!(Category::from(UsageIndex::User).crosses_root());
        assert!(!Category::from(CpuTimeIndex::Irq).crosses_root());
        assert!(!Category::from(CpuTimeIndex::GuestNice).crosses_root());
        assert_eq!(UsageIndex::from(ExecMode::Kernel), UsageIndex::System);
    }
}
