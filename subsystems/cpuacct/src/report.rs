//! # Control Files
//!
//! Textual reporting surface of a group. Each file renders into any
//! [`fmt::Write`] sink; only `usage` accepts a write, and only the value `0`.
//!
//! | File                | Content                                          |
//! |---------------------|--------------------------------------------------|
//! | `usage`             | total usage in ns                                |
//! | `usage_user`        | user usage in ns                                 |
//! | `usage_sys`         | system usage in ns                               |
//! | `usage_percpu`      | per-CPU total usage, space separated             |
//! | `usage_percpu_user` | per-CPU user usage                               |
//! | `usage_percpu_sys`  | per-CPU system usage                             |
//! | `usage_all`         | per-CPU table of user and system usage           |
//! | `stat`              | tick-sampled user / system in clock ticks        |
//! | `proc_stat`         | full summary in clock ticks plus migrations      |

use core::fmt;

use crate::cpu::CpuId;
use crate::error::{CpuacctError, CpuacctResult};
use crate::group::CpuacctGroup;
use crate::snapshot::SnapshotReader;
use crate::stat::UsageIndex;

/// Control file of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuacctFile {
    /// Total usage
    Usage,
    /// User usage
    UsageUser,
    /// System usage
    UsageSys,
    /// Per-CPU total usage
    UsagePercpu,
    /// Per-CPU user usage
    UsagePercpuUser,
    /// Per-CPU system usage
    UsagePercpuSys,
    /// Per-CPU usage table
    UsageAll,
    /// Tick-sampled user / system
    Stat,
    /// Extended summary
    ProcStat,
}

impl CpuacctFile {
    /// Every control file, in listing order
    pub const ALL: [Self; 9] = [
        Self::Usage,
        Self::UsageUser,
        Self::UsageSys,
        Self::UsagePercpu,
        Self::UsagePercpuUser,
        Self::UsagePercpuSys,
        Self::UsageAll,
        Self::Stat,
        Self::ProcStat,
    ];

    /// File name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::UsageUser => "usage_user",
            Self::UsageSys => "usage_sys",
            Self::UsagePercpu => "usage_percpu",
            Self::UsagePercpuUser => "usage_percpu_user",
            Self::UsagePercpuSys => "usage_percpu_sys",
            Self::UsageAll => "usage_all",
            Self::Stat => "stat",
            Self::ProcStat => "proc_stat",
        }
    }

    /// Look a file up by name
    pub fn from_name(name: &str) -> CpuacctResult<Self> {
        Self::ALL
            .into_iter()
            .find(|file| file.name() == name)
            .ok_or(CpuacctError::UnknownFile)
    }

    /// Whether the file accepts writes
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Usage)
    }
}

impl fmt::Display for CpuacctFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Usage counter selected by a file: one index, or all of them summed
#[derive(Clone, Copy)]
enum UsageSel {
    One(UsageIndex),
    All,
}

fn cpu_usage(group: &CpuacctGroup, cpu: CpuId, sel: UsageSel) -> u64 {
    match sel {
        UsageSel::One(index) => group.bank().usage(cpu, index),
        UsageSel::All => group.bank().read_all(cpu),
    }
}

fn usage_sum(group: &CpuacctGroup, sel: UsageSel) -> u64 {
    group
        .cpus()
        .fold(0u64, |acc, cpu| acc.wrapping_add(cpu_usage(group, cpu, sel)))
}

/// Single-value read of `usage`, `usage_user` and `usage_sys`
pub fn read_u64(file: CpuacctFile, group: &CpuacctGroup) -> Option<u64> {
    let sel = match file {
        CpuacctFile::Usage => UsageSel::All,
        CpuacctFile::UsageUser => UsageSel::One(UsageIndex::User),
        CpuacctFile::UsageSys => UsageSel::One(UsageIndex::System),
        _ => return None,
    };
    Some(usage_sum(group, sel))
}

fn show_percpu<W: fmt::Write>(out: &mut W, group: &CpuacctGroup, sel: UsageSel) -> fmt::Result {
    for cpu in group.cpus() {
        write!(out, "{} ", cpu_usage(group, cpu, sel))?;
    }
    out.write_str("\n")
}

fn show_all<W: fmt::Write>(out: &mut W, group: &CpuacctGroup) -> fmt::Result {
    out.write_str("cpu")?;
    for index in UsageIndex::ALL {
        write!(out, " {}", index.name())?;
    }
    out.write_str("\n")?;

    for cpu in group.cpus() {
        write!(out, "{}", cpu)?;
        for index in UsageIndex::ALL {
            write!(out, " {}", group.bank().usage(cpu, index))?;
        }
        out.write_str("\n")?;
    }
    Ok(())
}

fn show_stat<W: fmt::Write>(
    out: &mut W,
    reader: &SnapshotReader,
    group: &CpuacctGroup,
) -> fmt::Result {
    let stat = reader.stat(group);
    let config = reader.config();
    writeln!(out, "{} {}", UsageIndex::User.name(), config.nsec_to_clock_t(stat.user))?;
    writeln!(out, "{} {}", UsageIndex::System.name(), config.nsec_to_clock_t(stat.system))
}

fn show_proc_stat<W: fmt::Write>(
    out: &mut W,
    reader: &SnapshotReader,
    group: &CpuacctGroup,
) -> fmt::Result {
    let snap = reader.read_now(group).to_clock_t(reader.config());
    writeln!(out, "user {}", snap.user)?;
    writeln!(out, "nice {}", snap.nice)?;
    writeln!(out, "system {}", snap.system)?;
    writeln!(out, "idle {}", snap.idle)?;
    writeln!(out, "iowait {}", snap.iowait)?;
    writeln!(out, "irq {}", snap.irq)?;
    writeln!(out, "softirq {}", snap.softirq)?;
    writeln!(out, "steal {}", snap.steal)?;
    writeln!(out, "guest {}", snap.guest.wrapping_add(snap.guest_nice))?;
    writeln!(out, "nr_migrations {}", snap.migrations)
}

/// Render a control file of `group` into `out`
pub fn show<W: fmt::Write>(
    file: CpuacctFile,
    reader: &SnapshotReader,
    group: &CpuacctGroup,
    out: &mut W,
) -> fmt::Result {
    match file {
        CpuacctFile::Usage | CpuacctFile::UsageUser | CpuacctFile::UsageSys => {
            let value = read_u64(file, group).unwrap_or(0);
            writeln!(out, "{}", value)
        },
        CpuacctFile::UsagePercpu => show_percpu(out, group, UsageSel::All),
        CpuacctFile::UsagePercpuUser => show_percpu(out, group, UsageSel::One(UsageIndex::User)),
        CpuacctFile::UsagePercpuSys => show_percpu(out, group, UsageSel::One(UsageIndex::System)),
        CpuacctFile::UsageAll => show_all(out, group),
        CpuacctFile::Stat => show_stat(out, reader, group),
        CpuacctFile::ProcStat => show_proc_stat(out, reader, group),
    }
}

/// Write a value to a control file of `group`
pub fn write_u64(
    file: CpuacctFile,
    reader: &SnapshotReader,
    group: &CpuacctGroup,
    val: u64,
) -> CpuacctResult<()> {
    match file {
        CpuacctFile::Usage => reader.reset(group, val),
        _ => Err(CpuacctError::ReadOnlyFile(file.name())),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CpuacctConfig;
    use crate::kstat::KernelCpustat;
    use crate::stat::{Category, CpuTimeIndex};
    use alloc::string::String;
    use alloc::sync::Arc;

    fn setup(nr_cpus: usize) -> (SnapshotReader, Arc<KernelCpustat>, CpuacctGroup) {
        let config = CpuacctConfig::new(nr_cpus);
        let clock = Arc::new(ManualClock::new(0));
        let kstat = Arc::new(KernelCpustat::try_new(nr_cpus).unwrap());
        let root = Arc::new(CpuacctGroup::new_root(nr_cpus, &*clock).unwrap());
        let group =
            CpuacctGroup::try_new(crate::group::GroupId(1), Some(root), nr_cpus, &*clock).unwrap();
        let reader = SnapshotReader::new(config, kstat.clone(), clock).unwrap();
        (reader, kstat, group)
    }

    fn render(file: CpuacctFile, reader: &SnapshotReader, group: &CpuacctGroup) -> String {
        let mut out = String::new();
        show(file, reader, group, &mut out).unwrap();
        out
    }

    #[test]
    fn test_file_names() {
        for file in CpuacctFile::ALL {
            assert_eq!(CpuacctFile::from_name(file.name()), Ok(file));
        }
        assert_eq!(CpuacctFile::from_name("cpu.shares"), Err(CpuacctError::UnknownFile));
        assert!(CpuacctFile::Usage.is_writable());
        assert!(!CpuacctFile::ProcStat.is_writable());
    }

    #[test]
    fn test_usage_files() {
        let (reader, _, group) = setup(2);
        group.bank().charge(CpuId(0), Category::Usage(UsageIndex::User), 100);
        group.bank().charge(CpuId(1), Category::Usage(UsageIndex::System), 50);

        assert_eq!(render(CpuacctFile::Usage, &reader, &group), "150\n");
        assert_eq!(render(CpuacctFile::UsageUser, &reader, &group), "100\n");
        assert_eq!(render(CpuacctFile::UsageSys, &reader, &group), "50\n");
        assert_eq!(render(CpuacctFile::UsagePercpu, &reader, &group), "100 50 \n");
        assert_eq!(render(CpuacctFile::UsagePercpuUser, &reader, &group), "100 0 \n");
        assert_eq!(
            render(CpuacctFile::UsageAll, &reader, &group),
            "cpu user system\n0 100 0\n1 0 50\n"
        );
    }

    #[test]
    fn test_stat_file_in_ticks() {
        let (reader, _, group) = setup(1);
        let tick = crate::NSEC_PER_SEC / crate::USER_HZ;
        let bank = group.bank();
        bank.charge(CpuId(0), Category::Cpustat(CpuTimeIndex::User), 4 * tick);
        bank.charge(CpuId(0), Category::Cpustat(CpuTimeIndex::Nice), tick);
        bank.charge(CpuId(0), Category::Cpustat(CpuTimeIndex::Softirq), 2 * tick);

        assert_eq!(render(CpuacctFile::Stat, &reader, &group), "user 5\nsystem 2\n");
    }

    #[test]
    fn test_proc_stat_layout() {
        let (reader, _, group) = setup(1);
        let tick = crate::NSEC_PER_SEC / crate::USER_HZ;
        let bank = group.bank();
        bank.charge(CpuId(0), Category::Usage(UsageIndex::System), 3 * tick);
        bank.charge(CpuId(0), Category::Cpustat(CpuTimeIndex::Guest), tick);
        bank.charge(CpuId(0), Category::Cpustat(CpuTimeIndex::GuestNice), tick);
        group.migrations().record(CpuId(0));

        assert_eq!(
            render(CpuacctFile::ProcStat, &reader, &group),
            "user 0\nnice 0\nsystem 3\nidle 0\niowait 0\nirq 0\nsoftirq 0\nsteal 0\n\
             guest 2\nnr_migrations 1\n"
        );
    }

    #[test]
    fn test_writes() {
        let (reader, _, group) = setup(1);
        group.bank().charge(CpuId(0), Category::Usage(UsageIndex::User), 10);

        assert_eq!(
            write_u64(CpuacctFile::Stat, &reader, &group, 0),
            Err(CpuacctError::ReadOnlyFile("stat"))
        );
        assert!(write_u64(CpuacctFile::Usage, &reader, &group, 1).is_err());
        assert_eq!(read_u64(CpuacctFile::Usage, &group), Some(10));

        write_u64(CpuacctFile::Usage, &reader, &group, 0).unwrap();
        assert_eq!(read_u64(CpuacctFile::Usage, &group), Some(0));
        assert_eq!(read_u64(CpuacctFile::Stat, &group), None);
    }
}
