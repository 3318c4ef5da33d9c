//! # CPU Identifiers and Per-CPU Storage
//!
//! [`CpuId`] names a possible CPU, [`CpuMask`] is a fixed-size set of CPUs,
//! and [`PerCpu`] is the arena holding one cache-line aligned slot per
//! possible CPU.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬─────┐
//! │ slot CPU 0   │ slot CPU 1   │ slot CPU 2   │ ... │   one allocation,
//! │ (64B aligned)│ (64B aligned)│ (64B aligned)│     │   made at group creation
//! └──────────────┴──────────────┴──────────────┴─────┘
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;

use crate::error::{CpuacctError, CpuacctResult};
use crate::{CACHE_LINE_SIZE, MAX_CPUS};

// =============================================================================
// CPU Identifier
// =============================================================================

/// Logical CPU identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CpuId(pub u32);

impl CpuId {
    /// Index into per-CPU tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// CPU Mask
// =============================================================================

const MASK_WORDS: usize = MAX_CPUS / 64;

/// Fixed-size set of CPUs
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CpuMask {
    words: [u64; MASK_WORDS],
}

impl CpuMask {
    /// Empty mask
    pub const fn empty() -> Self {
        Self {
            words: [0; MASK_WORDS],
        }
    }

    /// Mask containing CPUs `0..nr_cpus`
    pub fn first(nr_cpus: usize) -> Self {
        let mut mask = Self::empty();
        for cpu in 0..nr_cpus.min(MAX_CPUS) {
            mask.set(CpuId(cpu as u32));
        }
        mask
    }

    /// Build a mask from a list of CPUs
    pub fn from_cpus(cpus: &[u32]) -> Self {
        let mut mask = Self::empty();
        for &cpu in cpus {
            mask.set(CpuId(cpu));
        }
        mask
    }

    /// Add a CPU to the mask
    #[inline]
    pub fn set(&mut self, cpu: CpuId) {
        let bit = cpu.index();
        assert!(bit < MAX_CPUS, "cpu {} exceeds MAX_CPUS", bit);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    /// Test whether a CPU is in the mask
    #[inline]
    pub fn contains(&self, cpu: CpuId) -> bool {
        let bit = cpu.index();
        bit < MAX_CPUS && (self.words[bit / 64] & (1u64 << (bit % 64))) != 0
    }

    /// Number of CPUs in the mask
    pub fn weight(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the mask is empty
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate over the CPUs in the mask in ascending order
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, &word)| {
            let mut bits = word;
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(CpuId((idx * 64 + bit) as u32))
            })
        })
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|c| c.0)).finish()
    }
}

// =============================================================================
// Per-CPU Arena
// =============================================================================

/// One per-CPU slot padded to its own cache line
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

static_assertions::const_assert_eq!(core::mem::align_of::<CacheAligned<u8>>(), CACHE_LINE_SIZE);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Per-CPU storage, one slot per possible CPU, allocated once
pub struct PerCpu<T> {
    slots: Box<[CacheAligned<T>]>,
}

impl<T> PerCpu<T> {
    /// Allocate `nr_cpus` slots, initializing each with `init`.
    ///
    /// Allocation failure is reported instead of aborting; nothing is
    /// reachable from the caller if this returns an error.
    pub fn try_new_with<F>(nr_cpus: usize, mut init: F) -> CpuacctResult<Self>
    where
        F: FnMut(CpuId) -> T,
    {
        if nr_cpus == 0 || nr_cpus > MAX_CPUS {
            return Err(CpuacctError::InvalidArgument {
                param: "nr_cpus",
                reason: "must be between 1 and MAX_CPUS",
            });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(nr_cpus)
            .map_err(|_| CpuacctError::OutOfMemory { cpus: nr_cpus })?;
        for cpu in 0..nr_cpus {
            slots.push(CacheAligned(init(CpuId(cpu as u32))));
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Number of possible CPUs covered
    #[inline]
    pub fn nr_cpus(&self) -> usize {
        self.slots.len()
    }

    /// Slot of a CPU.
    ///
    /// Panics if the CPU is outside the possible range; callers only ever
    /// pass CPUs handed out by the platform.
    #[inline]
    pub fn get(&self, cpu: CpuId) -> &T {
        let idx = cpu.index();
        assert!(
            idx < self.slots.len(),
            "cpu {} outside possible range 0..{}",
            idx,
            self.slots.len()
        );
        &self.slots[idx].0
    }

    /// Iterate over every possible CPU with its slot
    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (CpuId(idx as u32), &slot.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for PerCpu<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerCpu")
            .field("nr_cpus", &self.slots.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
