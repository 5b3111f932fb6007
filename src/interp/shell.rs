use std::path::{Path, PathBuf};

use super::{mtime_secs, read_cmdline, Interpreter, ScriptFiles};
use crate::model::Pid;

/// Recognizes `sh`/`bash`/`dash`. Interactive shells (no script argument)
/// are never stale via this path — only a resolvable script file counts.
pub struct ShellInterpreter;

impl Interpreter for ShellInterpreter {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn recognizes(&self, exe: Option<&Path>, fname: &str) -> bool {
        let base = exe
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(fname);
        matches!(base, "sh" | "bash" | "dash")
    }

    fn files(&self, proc_root: &Path, pid: Pid) -> ScriptFiles {
        let mut files = ScriptFiles::new();
        let argv = read_cmdline(proc_root, pid);
        if let Some(script) = script_argument(&argv) {
            if script.is_file() {
                if let Some(mtime) = mtime_secs(&script) {
                    files.insert(script, mtime);
                }
            }
        }
        files
    }
}

fn script_argument(argv: &[String]) -> Option<PathBuf> {
    let mut iter = argv.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "-c" {
            // Inline command string, consumes the next argument too.
            iter.next();
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
    fn recognizes_known_shells() {
        let r = ShellInterpreter;
        assert!(r.recognizes(Some(Path::new("/bin/bash")), "bash"));
        assert!(!r.recognizes(None, "zsh"));
    }

    #[test]
    fn interactive_shell_has_no_script() {
        let argv = vec!["bash".to_string()];
        assert_eq!(script_argument(&argv), None);
    }

    #[test]
    fn script_invocation_found() {
        let argv = vec!["bash".to_string(), "/opt/deploy.sh".to_string()];
        assert_eq!(
            script_argument(&argv),
            Some(PathBuf::from("/opt/deploy.sh"))
        );
    }
}
