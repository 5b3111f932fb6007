//! Core data model shared by every component: process snapshots, address-space
//! mapping entries and the restart-unit values the reducer and resolver
//! ultimately produce.

use std::collections::BTreeMap;
use std::path::PathBuf;

pub type Pid = i32;
pub type Uid = u32;

/// Immutable snapshot of one process, as read from `/proc/<pid>`.
///
/// Built once per run; never mutated after construction.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub ppid: Pid,
    pub uid: Uid,
    /// Ticks since boot, as printed in `/proc/<pid>/stat` field 22.
    pub start_time_ticks: u64,
    /// `comm` field from `/proc/<pid>/stat` (the short command name).
    pub fname: String,
    /// Resolved `exe` symlink target, with the `(deleted)` marker already
    /// stripped. `None` if the exe symlink could not be resolved at all
    /// (permission denied, not a regular mapping).
    pub exe_path: Option<PathBuf>,
    /// Whether the raw exe symlink carried a deleted marker, in either the
    /// trailing Linux form (`" (deleted)"`) or the leading VServer form
    /// (`"(deleted)"` prefix).
    pub exe_deleted: bool,
    pub tty_device: Option<PathBuf>,
    pub is_kernel_thread: bool,
}

impl ProcessRecord {
    /// Boot-relative start time in seconds, using the same clock source
    /// (`/proc/stat` `btime` + ticks/Hz) that `Clock` uses for "now".
    pub fn start_time_secs(&self, ticks_per_sec: u64) -> u64 {
        if ticks_per_sec == 0 {
            return 0;
        }
        self.start_time_ticks / ticks_per_sec
    }
}

/// A snapshot of the whole process table, keyed by PID.
#[derive(Debug, Default)]
pub struct ProcessTable {
    pub processes: BTreeMap<Pid, ProcessRecord>,
}

impl ProcessTable {
    pub fn get(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    /// Walks the parent chain starting at `pid`, stopping at PID 1 or when a
    /// cycle is detected. Iterative with a visited set to guard against a
    /// zombie reparented to itself.
    pub fn parent_chain(&self, pid: Pid) -> Vec<Pid> {
        let mut chain = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut current = pid;
        loop {
            if !visited.insert(current) {
                break;
            }
            chain.push(current);
            let Some(rec) = self.get(current) else {
                break;
            };
            if rec.ppid == current || rec.ppid == 0 {
                break;
            }
            current = rec.ppid;
        }
        chain
    }
}

/// One entry from `/proc/<pid>/maps`.
#[derive(Debug, Clone)]
pub struct MappingEntry {
    pub start_addr: u64,
    pub perms: String,
    pub offset: u64,
    pub dev: String,
    pub inode: u64,
    pub path: Option<PathBuf>,
}

impl MappingEntry {
    pub fn is_executable(&self) -> bool {
        self.perms.as_bytes().get(2) == Some(&b'x')
    }

    /// Entries eligible for staleness checks: executable, nonzero inode,
    /// non-empty path.
    pub fn participates_in_staleness(&self) -> bool {
        self.is_executable() && self.inode != 0 && self.path.is_some()
    }
}

/// The smallest nameable entity an operator can restart. Units are keyed
/// by name for dedup in the final set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestartUnit {
    SystemdService(String),
    SystemdManager,
    SysVInit,
    InitScript {
        name: String,
        has_lsb: bool,
        default_start_runlevels: Vec<u8>,
        pidfiles: Vec<PathBuf>,
    },
    UserSession {
        uid: Uid,
        session_id: String,
        commands: BTreeMap<String, Vec<Pid>>,
    },
    Container {
        name: String,
        restart_argv: Vec<String>,
    },
}

impl RestartUnit {
    /// The name used for dedup, blacklist matching and `NEEDRESTART-SVC`
    /// lines. `SystemdManager`/`SysVInit` use fixed display names.
    pub fn key(&self) -> String {
        match self {
            RestartUnit::SystemdService(name) => name.clone(),
            RestartUnit::SystemdManager => "systemd manager".to_string(),
            RestartUnit::SysVInit => "sysvinit".to_string(),
            RestartUnit::InitScript { name, .. } => name.clone(),
            RestartUnit::UserSession {
                uid, session_id, ..
            } => format!("session:{uid}:{session_id}"),
            RestartUnit::Container { name, .. } => format!("container:{name}"),
        }
    }

    pub fn is_service_like(&self) -> bool {
        matches!(
            self,
            RestartUnit::SystemdService(_) | RestartUnit::InitScript { .. }
        )
    }
}

/// Result of comparing the running kernel against installed kernel images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    NoUpgrade,
    AbiUpgrade,
    VerUpgrade,
    Unknown,
}

impl KernelStatus {
    /// Integer code used in the `NEEDRESTART-KSTA` batch line.
    pub fn code(self) -> u8 {
        match self {
            KernelStatus::NoUpgrade => 0,
            KernelStatus::AbiUpgrade => 1,
            KernelStatus::VerUpgrade => 2,
            KernelStatus::Unknown => 3,
        }
    }
}
