use std::path::{Path, PathBuf};

use super::{merge_fd_scripts_with_suffixes, mtime_secs, read_cmdline, Interpreter, ScriptFiles};
use crate::model::Pid;

/// Recognizes `perl`/`perl5.*` processes. Script path is the first
/// non-flag argument in `/proc/<pid>/cmdline`; `-e`/`-E` inline programs
/// have no file to check. Also picks up any `.pl`/`.pm` module still open
/// under the process's `fd` directory, so a module pulled in via `use`/
/// `require` after startup is visible too.
pub struct PerlInterpreter;

impl Interpreter for PerlInterpreter {
    fn name(&self) -> &'static str {
        "perl"
    }

    fn recognizes(&self, exe: Option<&Path>, fname: &str) -> bool {
        let base = exe
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(fname);
        base == "perl" || base.starts_with("perl5")
    }

    fn files(&self, proc_root: &Path, pid: Pid) -> ScriptFiles {
        let mut files = ScriptFiles::new();
        let argv = read_cmdline(proc_root, pid);
        if let Some(script) = script_argument(&argv) {
            if let Some(mtime) = mtime_secs(&script) {
                files.insert(script, mtime);
            }
        }
        merge_fd_scripts_with_suffixes(proc_root, pid, &[".pl", ".pm"], &mut files);
        files
    }
}

/// Scans argv (skipping argv[0]) for the first argument that isn't a
/// recognized flag and that resolves to a regular file. Returns `None` for
/// `-e`/`-E` inline-program invocations.
fn script_argument(argv: &[String]) -> Option<PathBuf> {
    let mut iter = argv.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "-e" || arg == "-E" {
            return None;
        }
        if arg.starts_with('-') {
            continue;
        }
        return Some(PathBuf::from(arg));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_perl_and_versioned_names() {
        let r = PerlInterpreter;
        assert!(r.recognizes(Some(Path::new("/usr/bin/perl")), "perl"));
        assert!(r.recognizes(None, "perl5.36.0"));
        assert!(!r.recognizes(None, "python3"));
    }

    #[test]
    fn finds_script_argument() {
        let argv = vec!["perl".to_string(), "-w".to_string(), "/opt/app.pl".to_string()];
        assert_eq!(script_argument(&argv), Some(PathBuf::from("/opt/app.pl")));
    }

    #[test]
    fn inline_program_has_no_script() {
        let argv = vec!["perl".to_string(), "-e".to_string(), "print 1".to_string()];
        assert_eq!(script_argument(&argv), None);
    }
}
