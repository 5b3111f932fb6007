//! Mapping inspector.
//!
//! Walks `/proc/<pid>/maps` and classifies each executable mapping as
//! current or stale, through a skip/stale chain and a device-comparison
//! rule tolerant of BSD-style and copy-on-write filesystems.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::MappingError;
use crate::model::{MappingEntry, Pid};

/// Pseudo-mapping path patterns that never participate in staleness checks.
fn pseudo_mapping_patterns() -> &'static [Regex] {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^/SYSV00000000",
            r"/drm",
            r"^/dev/",
            r"^/\[aio\]",
            r"/orcexec\.[0-9a-fA-F]+",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
    .as_slice()
}

pub struct MappingInspector<'a> {
    proc_root: &'a Path,
    /// Exe-path blacklist; a matching exe is fresh without inspection.
    blacklist: &'a [Regex],
}

impl<'a> MappingInspector<'a> {
    pub fn new(proc_root: &'a Path, blacklist: &'a [Regex]) -> Self {
        MappingInspector {
            proc_root,
            blacklist,
        }
    }

    /// Returns `true` if `pid` (whose resolved exe is `exe`, if any) has a
    /// stale executable mapping.
    pub fn is_stale(&self, pid: Pid, exe: Option<&Path>) -> Result<bool, MappingError> {
        if let Some(exe) = exe {
            let exe_str = exe.to_string_lossy();
            if self.blacklist.iter().any(|re| re.is_match(&exe_str)) {
                return Ok(false);
            }
        }

        let pid_dir = self.proc_root.join(pid.to_string());
        let maps_text = std::fs::read_to_string(pid_dir.join("maps")).map_err(|source| {
            MappingError::Io { pid, source }
        })?;
        let root_dir = pid_dir.join("root");

        for entry in parse_maps(&maps_text) {
            if !entry.participates_in_staleness() {
                continue;
            }
            let path = entry.path.as_ref().expect("checked above");
            let path_str = path.to_string_lossy();

            if pseudo_mapping_patterns()
                .iter()
                .any(|re| re.is_match(&path_str))
            {
                continue;
            }

            match self.classify(&entry, path, &root_dir) {
                MappingVerdict::Fresh | MappingVerdict::Indeterminate => continue,
                MappingVerdict::Stale => return Ok(true),
            }
        }
        Ok(false)
    }

    fn classify(&self, entry: &MappingEntry, path: &Path, root_dir: &Path) -> MappingVerdict {
        let rooted_path = join_under_root(root_dir, path);
        let host_result = std::fs::metadata(path);
        let rooted_result = rooted_path.map(std::fs::metadata);

        let mut successes = Vec::new();
        if let Ok(meta) = &host_result {
            successes.push(meta);
        }
        if let Some(Ok(meta)) = &rooted_result {
            successes.push(meta);
        }

        if successes.is_empty() {
            let host_missing = is_not_found(&host_result);
            let rooted_missing = rooted_result.as_ref().map(is_not_found).unwrap_or(true);
            if host_missing && rooted_missing {
                if is_tolerated_vanished_path(path) {
                    return MappingVerdict::Fresh;
                }
                return MappingVerdict::Stale;
            }
            // At least one candidate failed to stat for a reason other than
            // "doesn't exist" (permission, transient I/O): treat this mapping
            // as indeterminate and skip further checks on it.
            return MappingVerdict::Indeterminate;
        }

        for stat in successes {
            if entry.inode == stat.ino() && device_matches(&entry.dev, stat.dev()) {
                return MappingVerdict::Fresh;
            }
        }
        MappingVerdict::Stale
    }
}

enum MappingVerdict {
    Fresh,
    Stale,
    Indeterminate,
}

/// Paths under `/tmp/`, `/run/` or `/var/run/` are tolerated when they've
/// vanished entirely.
fn is_tolerated_vanished_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.starts_with("/tmp/") || s.starts_with("/run/") || s.starts_with("/var/run/")
}

fn join_under_root(root_dir: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix("/").unwrap_or(path);
    Some(root_dir.join(relative))
}

fn is_not_found(result: &std::io::Result<std::fs::Metadata>) -> bool {
    matches!(result, Err(e) if e.kind() == std::io::ErrorKind::NotFound)
}

/// Device comparison rule: the mapping's `MM:mm` string must equal one of
/// three synthesized candidates of the stat result, or begin with `00:`
/// (copy-on-write filesystem tolerance).
fn device_matches(mapping_dev: &str, stat_dev: u64) -> bool {
    if mapping_dev.starts_with("00:") {
        return true;
    }
    let stat_major = unsafe { libc::major(stat_dev) };
    let stat_minor = unsafe { libc::minor(stat_dev) };
    let new_form = format!("{:02x}:{:02x}", stat_major, stat_minor);
    let old_major = (stat_dev >> 8) & 0xff;
    let old_minor = stat_dev & 0xff;
    let old_form = format!("{:02x}:{:02x}", old_major, old_minor);
    mapping_dev == new_form || mapping_dev == old_form
}

/// Parses `/proc/<pid>/maps` lines of the form:
/// `start-end perms offset dev inode path`
fn parse_maps(text: &str) -> Vec<MappingEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let mut parts = line.splitn(6, ' ').filter(|s| !s.is_empty());
        let Some(range) = parts.next() else { continue };
        let Some(perms) = parts.next() else { continue };
        let Some(offset) = parts.next() else { continue };
        let Some(dev) = parts.next() else { continue };
        let Some(inode) = parts.next() else { continue };
        let path = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let start_addr = range
            .split('-')
            .next()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .unwrap_or(0);
        let offset = u64::from_str_radix(offset, 16).unwrap_or(0);
        let inode: u64 = inode.parse().unwrap_or(0);

        entries.push(MappingEntry {
            start_addr,
            perms: perms.to_string(),
            offset,
            dev: dev.to_string(),
            inode,
            path: path.map(PathBuf::from),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_zero_never_stale() {
        let entry = MappingEntry {
            start_addr: 0,
            perms: "r-xp".to_string(),
            offset: 0,
            dev: "00:00".to_string(),
            inode: 0,
            path: Some(PathBuf::from("/anything")),
        };
        assert!(!entry.participates_in_staleness());
    }

    #[test]
    fn non_executable_mapping_skipped() {
        let entry = MappingEntry {
            start_addr: 0,
            perms: "rw-p".to_string(),
            offset: 0,
            dev: "08:01".to_string(),
            inode: 42,
            path: Some(PathBuf::from("/lib/libc.so")),
        };
        assert!(!entry.participates_in_staleness());
    }

    #[test]
    fn bsd_style_device_matches_anything() {
        assert!(device_matches("00:00", 0x0801));
    }

    #[test]
    fn anonymous_device_prefix_matches_unconditionally() {
        assert!(device_matches("00:2a", 0x0801));
    }

    #[test]
    fn tolerated_vanished_paths() {
        assert!(is_tolerated_vanished_path(Path::new("/tmp/foo.so")));
        assert!(is_tolerated_vanished_path(Path::new("/run/foo.so")));
        assert!(is_tolerated_vanished_path(Path::new("/var/run/foo.so")));
        assert!(!is_tolerated_vanished_path(Path::new("/usr/lib/foo.so")));
    }

    #[test]
    fn parses_maps_line() {
        let text = "55a1e2-55a1e3 r-xp 00000000 08:01 123456 /usr/sbin/nginx\n";
        let entries = parse_maps(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dev, "08:01");
        assert_eq!(entries[0].inode, 123456);
        assert_eq!(entries[0].path, Some(PathBuf::from("/usr/sbin/nginx")));
        assert!(entries[0].is_executable());
    }

    #[test]
    fn pseudo_mapping_patterns_match_known_paths() {
        let pats = pseudo_mapping_patterns();
        assert!(pats.iter().any(|re| re.is_match("/SYSV00000000")));
        assert!(pats.iter().any(|re| re.is_match("/dev/zero")));
        assert!(pats.iter().any(|re| re.is_match("/orcexec.1a2b3c")));
    }
}
