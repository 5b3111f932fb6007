//! Component A: process table reader.
//!
//! Stat-field parsing follows the same defensive shape the pack's `sysinfo`
//! Linux backend uses (`parse_stat_file` in its `unix/linux/process.rs`):
//! split off the pid, then split off `comm` at the *last* `)` since command
//! names may themselves contain parentheses or whitespace, then tokenize the
//! remainder on whitespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ProcTableError;
use crate::model::{Pid, ProcessRecord, ProcessTable, Uid};

pub struct ProcessTableReader<'a> {
    proc_root: &'a Path,
}

impl<'a> ProcessTableReader<'a> {
    pub fn new(proc_root: &'a Path) -> Self {
        ProcessTableReader { proc_root }
    }

    /// Snapshots every readable PID directory under `/proc`. Per-PID
    /// failures (the process exited mid-scan, a race with `readdir`) are
    /// logged and skipped rather than aborting the whole snapshot.
    pub fn snapshot(&self) -> ProcessTable {
        let mut processes = BTreeMap::new();
        let entries = match std::fs::read_dir(self.proc_root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot read {}: {e}", self.proc_root.display());
                return ProcessTable { processes };
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<Pid>().ok()) else {
                continue;
            };
            match self.read_one(pid) {
                Ok(record) => {
                    processes.insert(pid, record);
                }
                Err(e) => {
                    log::debug!("skipping pid {pid}: {e}");
                }
            }
        }
        ProcessTable { processes }
    }

    /// Reads a single process's record. A kernel thread (unreadable `exe`
    /// symlink) is still returned, flagged, so callers that need the full
    /// table see it; staleness analysis skips kernel threads separately.
    pub fn read_one(&self, pid: Pid) -> Result<ProcessRecord, ProcTableError> {
        let pid_dir = self.proc_root.join(pid.to_string());
        let stat = std::fs::read_to_string(pid_dir.join("stat")).map_err(|source| {
            ProcTableError::Io { pid, source }
        })?;
        let (fname, fields) = parse_stat_fields(&stat).ok_or_else(|| ProcTableError::Parse {
            pid,
            reason: "malformed /proc/<pid>/stat".to_string(),
        })?;

        // Fields are 0-indexed starting right after `comm`: field[0] is
        // `state`, field[1] `ppid`, field[4] `tty_nr`, field[19] `starttime`.
        let ppid = field_i32(&fields, 1).ok_or_else(|| ProcTableError::Parse {
            pid,
            reason: "missing ppid field".to_string(),
        })?;
        let tty_nr = field_i64(&fields, 4).unwrap_or(0);
        let start_time_ticks = field_u64(&fields, 19).unwrap_or(0);

        let uid = read_uid(&pid_dir).unwrap_or(0);
        let (exe_path, exe_deleted) = read_exe(&pid_dir);
        let is_kernel_thread = exe_path.is_none() && !exe_deleted;
        let tty_device = resolve_tty(self.proc_root, tty_nr);

        Ok(ProcessRecord {
            pid,
            ppid,
            uid,
            start_time_ticks,
            fname,
            exe_path,
            exe_deleted,
            tty_device,
            is_kernel_thread,
        })
    }
}

/// Splits `/proc/<pid>/stat` into the `comm` field and the remaining
/// whitespace-delimited fields (fields start at `state`, index 0).
fn parse_stat_fields(data: &str) -> Option<(String, Vec<String>)> {
    let mut it = data.trim_end().splitn(2, ' ');
    let _pid = it.next()?;
    let rest = it.next()?;
    let mut it = rest.rsplitn(2, ')');
    let after_comm = it.next()?;
    let comm_and_state = it.next()?;
    let comm = comm_and_state.strip_prefix('(').unwrap_or(comm_and_state);
    let fields = after_comm
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    Some((comm.to_string(), fields))
}

fn field_i32(fields: &[String], idx: usize) -> Option<Pid> {
    fields.get(idx)?.parse().ok()
}

fn field_i64(fields: &[String], idx: usize) -> Option<i64> {
    fields.get(idx)?.parse().ok()
}

fn field_u64(fields: &[String], idx: usize) -> Option<u64> {
    fields.get(idx)?.parse().ok()
}

fn read_uid(pid_dir: &Path) -> Option<Uid> {
    let status = std::fs::read_to_string(pid_dir.join("status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    None
}

/// Resolves `exe` and strips either deleted marker:
///  - trailing Linux form: `/usr/bin/foo (deleted)`
///  - leading VServer form: `(deleted)/usr/bin/foo`
fn read_exe(pid_dir: &Path) -> (Option<PathBuf>, bool) {
    match std::fs::read_link(pid_dir.join("exe")) {
        Ok(target) => {
            let raw = target.to_string_lossy().into_owned();
            let (path, deleted) = strip_deleted_marker(&raw);
            (Some(path), deleted)
        }
        Err(_) => (None, false),
    }
}

/// Strips either deleted marker from a raw `exe` symlink target string.
fn strip_deleted_marker(raw: &str) -> (PathBuf, bool) {
    if let Some(stripped) = raw.strip_suffix(" (deleted)") {
        (PathBuf::from(stripped), true)
    } else if let Some(stripped) = raw.strip_prefix("(deleted)") {
        (PathBuf::from(stripped), true)
    } else {
        (PathBuf::from(raw), false)
    }
}

/// Resolves a packed `tty_nr` (as printed in `/proc/<pid>/stat`) to a device
/// path by consulting `/proc/tty/drivers`, the same source the pack's
/// `uutils-procps` `pgrep` backend parses for TTY resolution.
fn resolve_tty(proc_root: &Path, tty_nr: i64) -> Option<PathBuf> {
    if tty_nr == 0 {
        return None;
    }
    let major = (tty_nr >> 8) & 0xfff;
    let minor = (tty_nr & 0xff) | ((tty_nr >> 12) & 0xfff00);
    let drivers = std::fs::read_to_string(proc_root.join("tty/drivers")).ok()?;
    for line in drivers.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 {
            continue;
        }
        let device_prefix = cols[1];
        let drv_major: i64 = cols[2].parse().ok()?;
        if drv_major != major {
            continue;
        }
        let (min_minor, max_minor) = match cols[3].split_once('-') {
            Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
            None => {
                let m: i64 = cols[3].parse().ok()?;
                (m, m)
            }
        };
        if minor < min_minor || minor > max_minor {
            continue;
        }
        if device_prefix == "/dev/pts" {
            return Some(PathBuf::from(format!("/dev/pts/{minor}")));
        }
        if min_minor == max_minor {
            return Some(PathBuf::from(device_prefix));
        }
        return Some(PathBuf::from(format!(
            "{device_prefix}{}",
            minor - min_minor
        )));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comm() {
        let data = "4242 (nginx) S 1 4242 4242 0 -1 4194560 100 0 0 0 0 0 0 0 20 0 1 0 987654 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let (comm, fields) = parse_stat_fields(data).unwrap();
        assert_eq!(comm, "nginx");
        assert_eq!(field_i32(&fields, 1), Some(1));
        assert_eq!(field_u64(&fields, 19), Some(987654));
    }

    #[test]
    fn parses_comm_with_parens_and_spaces() {
        let data = "99 (my (weird) proc) S 1 1 1 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 123 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let (comm, fields) = parse_stat_fields(data).unwrap();
        assert_eq!(comm, "my (weird) proc");
        assert_eq!(field_i32(&fields, 1), Some(1));
    }

    #[test]
    fn strips_trailing_deleted_marker() {
        let (path, deleted) = strip_deleted_marker("/usr/sbin/nginx (deleted)");
        assert_eq!(path, PathBuf::from("/usr/sbin/nginx"));
        assert!(deleted);
    }

    #[test]
    fn strips_leading_vserver_deleted_marker() {
        let (path, deleted) = strip_deleted_marker("(deleted)/usr/sbin/nginx");
        assert_eq!(path, PathBuf::from("/usr/sbin/nginx"));
        assert!(deleted);
    }

    #[test]
    fn leaves_ordinary_path_untouched() {
        let (path, deleted) = strip_deleted_marker("/usr/sbin/nginx");
        assert_eq!(path, PathBuf::from("/usr/sbin/nginx"));
        assert!(!deleted);
    }

    #[test]
    fn resolves_tty_from_drivers_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tty")).unwrap();
        std::fs::write(
            dir.path().join("tty/drivers"),
            "pty_slave            /dev/pts      136 0-1048575 pty:slave\n",
        )
        .unwrap();
        // tty_nr packs major in bits 8..20 and minor split across bits 0..8
        // and 20+, matching the kernel's MKDEV layout for the "new" encoding.
        let tty_nr: i64 = (136i64 << 8) | 5;
        let resolved = resolve_tty(dir.path(), tty_nr);
        assert_eq!(resolved, Some(PathBuf::from("/dev/pts/5")));
    }
}
