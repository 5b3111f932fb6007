use std::path::{Path, PathBuf};

use super::{merge_fd_scripts_with_suffixes, mtime_secs, read_cmdline, Interpreter, ScriptFiles};
use crate::model::Pid;

/// Recognizes `ruby` processes; same cmdline-based resolution shape as
/// [`super::perl::PerlInterpreter`] and [`super::python::PythonInterpreter`],
/// plus the same `fd`-directory fallback for `.rb` files `require`d after
/// startup.
pub struct RubyInterpreter;

impl Interpreter for RubyInterpreter {
    fn name(&self) -> &'static str {
        "ruby"
    }

    fn recognizes(&self, exe: Option<&Path>, fname: &str) -> bool {
        let base = exe
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(fname);
        base == "ruby" || base.starts_with("ruby")
    }

    fn files(&self, proc_root: &Path, pid: Pid) -> ScriptFiles {
        let mut files = ScriptFiles::new();
        let argv = read_cmdline(proc_root, pid);
        if let Some(script) = script_argument(&argv) {
            if let Some(mtime) = mtime_secs(&script) {
                files.insert(script, mtime);
            }
        }
        merge_fd_scripts_with_suffixes(proc_root, pid, &[".rb"], &mut files);
        files
    }
}

fn script_argument(argv: &[String]) -> Option<PathBuf> {
    let mut iter = argv.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "-e" {
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
    fn recognizes_ruby() {
        let r = RubyInterpreter;
        assert!(r.recognizes(Some(Path::new("/usr/bin/ruby")), "ruby"));
        assert!(!r.recognizes(None, "perl"));
    }
}
