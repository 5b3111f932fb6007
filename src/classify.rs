//! Stale classification for a single PID: combines the deleted-marker
//! check, the mapping inspector and the interpreter registry into a
//! four-step priority chain.

use std::path::Path;

use crate::clock;
use crate::interp::InterpreterRegistry;
use crate::model::ProcessRecord;
use crate::proc::MappingInspector;

pub struct StaleClassifier<'a> {
    pub mapping_inspector: MappingInspector<'a>,
    pub interpreters: &'a InterpreterRegistry,
    pub interpscan_enabled: bool,
    pub proc_root: &'a Path,
    pub btime: u64,
    pub ticks_per_sec: u64,
}

impl<'a> StaleClassifier<'a> {
    /// Evaluates the four-step priority chain. Stops at the first step that
    /// determines staleness; a process not caught by any step is fresh.
    pub fn is_stale(&self, record: &ProcessRecord) -> bool {
        // (1) exe path carries a deleted marker.
        if record.exe_deleted {
            return true;
        }

        // (2)+(3): any executable mapping is missing on disk, or its
        // (dev,inode) doesn't match the on-disk file.
        match self
            .mapping_inspector
            .is_stale(record.pid, record.exe_path.as_deref())
        {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                log::debug!("mapping inspection failed for pid {}: {e}", record.pid);
            }
        }

        // (4): interpreter check, only when interpscan is enabled.
        if self.interpscan_enabled {
            let start_wallclock = clock::process_start_wallclock(
                record.start_time_ticks,
                self.btime,
                self.ticks_per_sec,
            );
            if self.interpreters.interp_check(
                self.proc_root,
                record.pid,
                record.exe_path.as_deref(),
                &record.fname,
                start_wallclock,
            ) {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_record() -> ProcessRecord {
        ProcessRecord {
            pid: 100,
            ppid: 1,
            uid: 0,
            start_time_ticks: 0,
            fname: "test".to_string(),
            exe_path: Some(PathBuf::from("/usr/bin/test")),
            exe_deleted: false,
            tty_device: None,
            is_kernel_thread: false,
        }
    }

    #[test]
    fn deleted_marker_is_stale_without_further_checks() {
        let mut record = base_record();
        record.exe_deleted = true;
        // mapping_inspector would fail to even open /proc/100/maps here,
        // but the deleted check short-circuits before that.
        let proc_root = tempfile::tempdir().unwrap();
        let registry = InterpreterRegistry::with_builtins();
        let blacklist: Vec<regex::Regex> = vec![];
        let classifier = StaleClassifier {
            mapping_inspector: MappingInspector::new(proc_root.path(), &blacklist),
            interpreters: &registry,
            interpscan_enabled: true,
            proc_root: proc_root.path(),
            btime: 0,
            ticks_per_sec: 100,
        };
        assert!(classifier.is_stale(&record));
    }
}
