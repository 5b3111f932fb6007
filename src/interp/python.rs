use std::path::{Path, PathBuf};

use super::{merge_fd_scripts_with_suffixes, mtime_secs, read_cmdline, Interpreter, ScriptFiles};
use crate::model::Pid;

/// Recognizes `python`/`python2`/`python3.*` processes; skips `-c`/`-m`
/// invocations (no file to check). Also picks up any `.py` module still
/// open under the process's `fd` directory, catching an `import`ed module
/// the top-level script argument alone wouldn't show.
pub struct PythonInterpreter;

impl Interpreter for PythonInterpreter {
    fn name(&self) -> &'static str {
        "python"
    }

    fn recognizes(&self, exe: Option<&Path>, fname: &str) -> bool {
        let base = exe
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(fname);
        base.starts_with("python")
    }

    fn files(&self, proc_root: &Path, pid: Pid) -> ScriptFiles {
        let mut files = ScriptFiles::new();
        let argv = read_cmdline(proc_root, pid);
        if let Some(script) = script_argument(&argv) {
            if let Some(mtime) = mtime_secs(&script) {
                files.insert(script, mtime);
            }
        }
        merge_fd_scripts_with_suffixes(proc_root, pid, &[".py"], &mut files);
        files
    }
}

fn script_argument(argv: &[String]) -> Option<PathBuf> {
    let mut iter = argv.iter().skip(1).peekable();
    while let Some(arg) = iter.next() {
        if arg == "-c" || arg == "-m" {
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
    fn recognizes_python_variants() {
        let r = PythonInterpreter;
        assert!(r.recognizes(Some(Path::new("/usr/bin/python3")), "python3"));
        assert!(r.recognizes(None, "python2.7"));
        assert!(!r.recognizes(None, "ruby"));
    }

    #[test]
    fn finds_script_file() {
        let argv = vec![
            "python3".to_string(),
            "/home/u/app.py".to_string(),
        ];
        assert_eq!(
            script_argument(&argv),
            Some(PathBuf::from("/home/u/app.py"))
        );
    }

    #[test]
    fn module_invocation_has_no_file() {
        let argv = vec!["python3".to_string(), "-m".to_string(), "http.server".to_string()];
        assert_eq!(script_argument(&argv), None);
    }
}
