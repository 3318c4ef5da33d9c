//! # Error Types
//!
//! Errors reported by the CPU accounting subsystem. Only group lifecycle,
//! configuration and control-file writes can fail; the charge path never
//! returns an error.

use core::fmt;

use crate::cpu::CpuId;
use crate::group::{GroupId, TaskId};

/// Result type for CPU accounting operations
pub type CpuacctResult<T> = Result<T, CpuacctError>;

/// CPU accounting error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuacctError {
    /// Invalid argument
    InvalidArgument {
        /// The name of the invalid parameter
        param: &'static str,
        /// The reason why the parameter is invalid
        reason: &'static str,
    },
    /// Per-CPU storage could not be allocated
    OutOfMemory {
        /// Number of per-CPU slots requested
        cpus: usize,
    },
    /// Group not registered
    GroupNotFound(GroupId),
    /// Group still has children or attached tasks
    GroupBusy(GroupId),
    /// Operation not permitted on the root group
    RootGroup,
    /// Task not attached to any group
    TaskNotFound(TaskId),
    /// CPU outside the possible range
    InvalidCpu(CpuId),
    /// No control file with that name
    UnknownFile,
    /// Control file is read-only
    ReadOnlyFile(&'static str),
    /// Rendering a control file into its sink failed
    Format,
}

impl fmt::Display for CpuacctError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { param, reason } => {
                write!(f, "Invalid argument '{param}': {reason}")
            },
            Self::OutOfMemory { cpus } => {
                write!(f, "Out of memory allocating per-CPU state for {cpus} CPUs")
            },
            Self::GroupNotFound(id) => write!(f, "Group {id} not found"),
            Self::GroupBusy(id) => write!(f, "Group {id} still has children or tasks"),
            Self::RootGroup => write!(f, "Operation not permitted on the root group"),
            Self::TaskNotFound(task) => write!(f, "Task {task} is not attached to a group"),
            Self::InvalidCpu(cpu) => write!(f, "CPU {cpu} outside the possible range"),
            Self::UnknownFile => write!(f, "Unknown control file"),
            Self::ReadOnlyFile(name) => write!(f, "Control file '{name}' is read-only"),
            Self::Format => write!(f, "Failed to render control file"),
        }
    }
}

impl CpuacctError {
    /// Errno-style code, for callers that surface errors to userspace
    pub const fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidCpu(_) => -22, // EINVAL
            Self::OutOfMemory { .. } => -12,                           // ENOMEM
            Self::GroupNotFound(_) | Self::TaskNotFound(_) | Self::UnknownFile => -2, // ENOENT
            Self::GroupBusy(_) => -16,                                 // EBUSY
            Self::RootGroup | Self::ReadOnlyFile(_) => -1,             // EPERM
            Self::Format => -5,                                        // EIO
        }
    }
}

impl From<fmt::Error> for CpuacctError {
    fn from(_: fmt::Error) -> Self {
        Self::Format
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_display_messages() {
        let err = CpuacctError::InvalidArgument {
            param: "usage",
            reason: "only 0 resets the counters",
        };
        assert_eq!(
            err.to_string(),
            "Invalid argument 'usage': only 0 resets the counters"
        );
        assert_eq!(
            CpuacctError::GroupBusy(GroupId(7)).to_string(),
            "Group 7 still has children or tasks"
        );
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(CpuacctError::OutOfMemory { cpus: 4 }.errno(), -12);
        assert_eq!(CpuacctError::GroupBusy(GroupId(1)).errno(), -16);
        assert_eq!(CpuacctError::ReadOnlyFile("stat").errno(), -1);
    }
}
