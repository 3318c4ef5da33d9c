//! # Accounting Configuration
//!
//! Boot-time configuration of the accounting subsystem: the possible-CPU
//! range, the externally reported tick rate, optional statistics and the
//! housekeeping CPU set.

use bitflags::bitflags;

use crate::cpu::{CpuId, CpuMask};
use crate::error::{CpuacctError, CpuacctResult};
use crate::{MAX_CPUS, NSEC_PER_SEC, USER_HZ};

bitflags! {
    /// Optional accounting features
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcctFeatures: u32 {
        /// Track idle / iowait / ineffective windows and derive steal time
        const SCHEDSTATS   = 1 << 0;
        /// Restrict the extended summary of non-root groups to housekeeping CPUs
        const HOUSEKEEPING = 1 << 1;
    }
}

impl Default for AcctFeatures {
    fn default() -> Self {
        Self::SCHEDSTATS | Self::HOUSEKEEPING
    }
}

/// Accounting configuration
#[derive(Debug, Clone, Copy)]
pub struct CpuacctConfig {
    /// Number of possible CPUs
    pub nr_cpus: usize,
    /// Externally reported clock ticks per second
    pub user_hz: u64,
    /// Enabled features
    pub features: AcctFeatures,
    /// CPUs taking part in general scheduling domains
    pub housekeeping: CpuMask,
}

impl CpuacctConfig {
    /// Configuration for `nr_cpus` possible CPUs with default settings
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            nr_cpus,
            user_hz: USER_HZ,
            features: AcctFeatures::default(),
            housekeeping: CpuMask::first(nr_cpus),
        }
    }

    /// Set the external tick rate
    pub fn with_user_hz(mut self, user_hz: u64) -> Self {
        self.user_hz = user_hz;
        self
    }

    /// Set the enabled features
    pub fn with_features(mut self, features: AcctFeatures) -> Self {
        self.features = features;
        self
    }

    /// Set the housekeeping CPUs
    pub fn with_housekeeping(mut self, housekeeping: CpuMask) -> Self {
        self.housekeeping = housekeeping;
        self
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> CpuacctResult<()> {
        if self.nr_cpus == 0 || self.nr_cpus > MAX_CPUS {
            return Err(CpuacctError::InvalidArgument {
                param: "nr_cpus",
                reason: "must be between 1 and MAX_CPUS",
            });
        }
        if self.user_hz == 0 || NSEC_PER_SEC % self.user_hz != 0 {
            return Err(CpuacctError::InvalidArgument {
                param: "user_hz",
                reason: "must divide one second in nanoseconds",
            });
        }
        if self.housekeeping.iter().any(|cpu| cpu.index() >= self.nr_cpus) {
            return Err(CpuacctError::InvalidArgument {
                param: "housekeeping",
                reason: "contains CPUs outside the possible range",
            });
        }
        if self.features.contains(AcctFeatures::HOUSEKEEPING) && self.housekeeping.is_empty() {
            return Err(CpuacctError::InvalidArgument {
                param: "housekeeping",
                reason: "at least one housekeeping CPU is required",
            });
        }
        Ok(())
    }

    /// Whether window tracking is enabled
    #[inline]
    pub fn schedstats(&self) -> bool {
        self.features.contains(AcctFeatures::SCHEDSTATS)
    }

    /// Whether a CPU contributes to the extended summary of non-root groups
    #[inline]
    pub fn is_housekeeping(&self, cpu: CpuId) -> bool {
        !self.features.contains(AcctFeatures::HOUSEKEEPING) || self.housekeeping.contains(cpu)
    }

    /// Convert nanoseconds to external clock ticks, truncating
    #[inline]
    pub fn nsec_to_clock_t(&self, ns: u64) -> u64 {
        ns / (NSEC_PER_SEC / self.user_hz)
    }
}

impl Default for CpuacctConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CpuacctConfig::new(8);
        assert!(config.validate().is_ok());
        assert!(config.schedstats());
        assert_eq!(config.housekeeping.weight(), 8);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(CpuacctConfig::new(0).validate().is_err());
        assert!(CpuacctConfig::new(MAX_CPUS + 1).validate().is_err());
        assert!(CpuacctConfig::new(4).with_user_hz(0).validate().is_err());
        assert!(CpuacctConfig::new(4).with_user_hz(7).validate().is_err());
        assert!(CpuacctConfig::new(4)
            .with_housekeeping(CpuMask::from_cpus(&[5]))
            .validate()
            .is_err());
        assert!(CpuacctConfig::new(4)
            .with_housekeeping(CpuMask::empty())
            .validate()
            .is_err());
    }

    #[test]
    fn test_nsec_to_clock_t_truncates() {
        let config = CpuacctConfig::new(1);
        assert_eq!(config.nsec_to_clock_t(0), 0);
        assert_eq!(config.nsec_to_clock_t(9_999_999), 0);
        assert_eq!(config.nsec_to_clock_t(10_000_000), 1);
        assert_eq!(config.nsec_to_clock_t(1_999_999_999), 199);

        let config = config.with_user_hz(1000);
        assert_eq!(config.nsec_to_clock_t(1_999_999_999), 1999);
    }

    #[test]
    fn test_housekeeping_filter() {
        let config = CpuacctConfig::new(4).with_housekeeping(CpuMask::from_cpus(&[0, 1]));
        assert!(config.is_housekeeping(CpuId(1)));
        assert!(!config.is_housekeeping(CpuId(3)));

        let config = config.with_features(AcctFeatures::SCHEDSTATS);
        assert!(config.is_housekeeping(CpuId(3)));
    }
}
