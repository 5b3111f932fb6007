//! Interpreter registry: a static, priority-ordered table of language-runtime
//! recognizers built at program start. `interp_check` is the registry's
//! single entry point.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

mod perl;
mod python;
mod ruby;
mod shell;

use crate::model::Pid;

/// A script path and the mtime the kernel reports for it, in seconds since
/// the Unix epoch.
pub type ScriptFiles = BTreeMap<PathBuf, u64>;

/// Capability set a language-runtime recognizer implements.
pub trait Interpreter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap identity check against the process's resolved exe and short
    /// command name.
    fn recognizes(&self, exe: Option<&Path>, fname: &str) -> bool;

    /// Script files the process currently has loaded, with mtimes.
    fn files(&self, proc_root: &Path, pid: Pid) -> ScriptFiles;

    /// The primary script a language runtime is executing, if any — used
    /// later by the service resolver.
    fn source_of(&self, proc_root: &Path, pid: Pid) -> Option<PathBuf> {
        self.files(proc_root, pid).into_keys().next()
    }
}

/// Priority-ordered, statically built registry of recognizers.
pub struct InterpreterRegistry {
    recognizers: Vec<Box<dyn Interpreter>>,
}

impl InterpreterRegistry {
    pub fn with_builtins() -> Self {
        InterpreterRegistry {
            recognizers: vec![
                Box::new(perl::PerlInterpreter),
                Box::new(python::PythonInterpreter),
                Box::new(ruby::RubyInterpreter),
                Box::new(shell::ShellInterpreter),
            ],
        }
    }

    fn find(&self, exe: Option<&Path>, fname: &str) -> Option<&dyn Interpreter> {
        self.recognizers
            .iter()
            .find(|r| r.recognizes(exe, fname))
            .map(|b| b.as_ref())
    }

    /// For the first recognizer whose `recognizes` returns true, gather
    /// files and return true if any file's mtime is newer than the
    /// process's start time (using the same boot-relative clock source
    /// for both quantities).
    ///
    /// An earlier implementation bumped a debug counter unconditionally on
    /// every call here, with no apparent purpose beyond noisier logging at
    /// higher verbosity; that side effect is intentionally not reproduced.
    pub fn interp_check(
        &self,
        proc_root: &Path,
        pid: Pid,
        exe: Option<&Path>,
        fname: &str,
        start_time_wallclock: u64,
    ) -> bool {
        let Some(interp) = self.find(exe, fname) else {
            return false;
        };
        let files = interp.files(proc_root, pid);
        let stale = files
            .values()
            .any(|&mtime| mtime > start_time_wallclock);
        log::debug!(
            "interp_check({pid}): interpreter={}, files={}, stale={stale}",
            interp.name(),
            files.len()
        );
        stale
    }

    pub fn source_of(&self, proc_root: &Path, pid: Pid, exe: Option<&Path>, fname: &str) -> Option<PathBuf> {
        self.find(exe, fname)
            .and_then(|interp| interp.source_of(proc_root, pid))
    }
}

/// Reads `/proc/<pid>/cmdline` (NUL-separated) into its argv vector.
pub(crate) fn read_cmdline(proc_root: &Path, pid: Pid) -> Vec<String> {
    let raw = std::fs::read(proc_root.join(pid.to_string()).join("cmdline")).unwrap_or_default();
    raw.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Scans `/proc/<pid>/fd` for open regular files whose name ends in one of
/// `suffixes`, merging them (with mtimes) into `files`. Catches libraries a
/// language runtime `require`s/`import`s after startup, not just the
/// top-level script named on argv.
pub(crate) fn merge_fd_scripts_with_suffixes(
    proc_root: &Path,
    pid: Pid,
    suffixes: &[&str],
    files: &mut ScriptFiles,
) {
    let fd_dir = proc_root.join(pid.to_string()).join("fd");
    let Ok(entries) = std::fs::read_dir(&fd_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(target) = std::fs::read_link(entry.path()) else {
            continue;
        };
        let matches_suffix = target
            .to_str()
            .map(|s| suffixes.iter().any(|suf| s.ends_with(suf)))
            .unwrap_or(false);
        if !matches_suffix {
            continue;
        }
        if let Some(mtime) = mtime_secs(&target) {
            files.insert(target, mtime);
        }
    }
}

pub(crate) fn mtime_secs(path: &Path) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_builtins_in_priority_order() {
        let reg = InterpreterRegistry::with_builtins();
        let names: Vec<_> = reg.recognizers.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["perl", "python", "ruby", "shell"]);
    }

    #[test]
    fn fd_scan_picks_up_matching_suffix_and_skips_others() {
        let proc_root = tempfile::tempdir().unwrap();
        let module_dir = tempfile::tempdir().unwrap();
        let module_path = module_dir.path().join("Helper.pm");
        std::fs::write(&module_path, "package Helper;").unwrap();
        let other_path = module_dir.path().join("notes.txt");
        std::fs::write(&other_path, "irrelevant").unwrap();

        let fd_dir = proc_root.path().join("4242").join("fd");
        std::fs::create_dir_all(&fd_dir).unwrap();
        std::os::unix::fs::symlink(&module_path, fd_dir.join("3")).unwrap();
        std::os::unix::fs::symlink(&other_path, fd_dir.join("4")).unwrap();

        let mut files = ScriptFiles::new();
        merge_fd_scripts_with_suffixes(proc_root.path(), 4242, &[".pl", ".pm"], &mut files);

        assert_eq!(files.len(), 1);
        assert!(files.contains_key(&module_path));
    }
}
