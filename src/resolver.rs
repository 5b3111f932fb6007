//! Service resolver: invokes package-manager hooks, parses LSB init-script
//! headers and matches PID files to name the restartable unit owning a
//! stale process.
//!
//! Every hook/`systemctl` child is spawned with `std::process::Command` +
//! `Stdio::piped()`, its stdout drained to EOF, and then awaited on every
//! exit path so no pipe or zombie is leaked.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ResolverError;
use crate::model::Pid;
use crate::natord;

#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    pub packages: Vec<String>,
    pub init_scripts: Vec<String>,
}

/// One `### BEGIN INIT INFO` / `### END INIT INFO` block's fields relevant
/// to the restart decision, plus a few more a complete LSB parser naturally
/// extracts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LsbHeader {
    pub provides: Vec<String>,
    pub required_start: Vec<String>,
    pub required_stop: Vec<String>,
    pub default_start: Vec<u8>,
    pub short_description: Option<String>,
}

pub struct ServiceResolver<'a> {
    hook_dir: &'a Path,
    verbose: bool,
}

#[derive(Debug)]
pub enum ResolveOutcome {
    /// A hook's `RC` script had a pidfile whose content matched the subject
    /// PID exactly — the canonical unit.
    PidfileMatch(String),
    /// No hook produced a pidfile match; these scripts matched the current
    /// runlevel but had no pidfiles at all.
    NoPidfileCandidates(Vec<String>),
    /// No hook produced anything usable.
    Unresolved,
}

impl<'a> ServiceResolver<'a> {
    pub fn new(hook_dir: &'a Path, verbose: bool) -> Self {
        ServiceResolver { hook_dir, verbose }
    }

    /// Invokes every executable hook in `hook_dir`, in natural-sorted
    /// order, with `exe` (and `-v` in verbose mode) as the last argument.
    pub fn run_hooks(&self, exe: &Path) -> Result<Vec<HookOutput>, ResolverError> {
        let mut hooks = self.list_hooks()?;
        natord::sort_by_key(&mut hooks, |p| p.to_string_lossy().into_owned());

        let mut outputs = Vec::new();
        for hook in hooks {
            match self.run_one_hook(&hook, exe) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    log::warn!("hook {} failed: {e}", hook.display());
                }
            }
        }
        Ok(outputs)
    }

    fn list_hooks(&self) -> Result<Vec<PathBuf>, ResolverError> {
        let entries = std::fs::read_dir(self.hook_dir).map_err(|source| {
            ResolverError::HookDirUnreadable {
                path: self.hook_dir.display().to_string(),
                source,
            }
        })?;
        let mut hooks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if is_executable(&path) {
                hooks.push(path);
            }
        }
        Ok(hooks)
    }

    /// Validates that `hook_dir` exists and is readable. Called once up
    /// front, before the reduction pipeline runs: an unknown hook directory
    /// is a fatal configuration error (spec.md §7), unlike an individual
    /// hook's failure, which `run_hooks` logs and skips.
    pub fn validate_hook_dir(hook_dir: &Path) -> Result<(), ResolverError> {
        std::fs::read_dir(hook_dir)
            .map(|_| ())
            .map_err(|source| ResolverError::HookDirUnreadable {
                path: hook_dir.display().to_string(),
                source,
            })
    }

    fn run_one_hook(&self, hook: &Path, exe: &Path) -> Result<HookOutput, ResolverError> {
        let mut cmd = Command::new(hook);
        if self.verbose {
            cmd.arg("-v");
        }
        cmd.arg(exe);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ResolverError::HookSpawn {
            hook: hook.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)
                .map_err(|source| ResolverError::HookIo {
                    hook: hook.display().to_string(),
                    source,
                })?;
        }
        let status = child.wait().map_err(|source| ResolverError::HookIo {
            hook: hook.display().to_string(),
            source,
        })?;
        if !status.success() {
            log::debug!("hook {} exited with {status}", hook.display());
        }

        Ok(parse_hook_output(&stdout))
    }

    /// Resolves the canonical unit for `pid` given the hooks' `RC` output
    /// and the current runlevel.
    pub fn resolve(
        &self,
        init_scripts: &[String],
        current_runlevel: u8,
        pid: Pid,
    ) -> ResolveOutcome {
        let mut no_pidfile_candidates = Vec::new();
        for script_name in init_scripts {
            let Ok(text) = std::fs::read_to_string(script_name) else {
                continue;
            };
            let header = parse_lsb_header(&text);
            if let Some(header) = &header {
                if !header.default_start.contains(&current_runlevel) {
                    log::debug!(
                        "skipping {script_name}: runlevel {current_runlevel} not in default-start"
                    );
                    continue;
                }
            }
            let pidfiles = find_pidfiles(&text);
            if pidfiles.is_empty() {
                no_pidfile_candidates.push(unit_name_from_script(script_name));
                continue;
            }
            for pidfile in &pidfiles {
                if pidfile_matches(pidfile, pid) {
                    return ResolveOutcome::PidfileMatch(unit_name_from_script(script_name));
                }
            }
            no_pidfile_candidates.push(unit_name_from_script(script_name));
        }
        if no_pidfile_candidates.is_empty() {
            ResolveOutcome::Unresolved
        } else {
            ResolveOutcome::NoPidfileCandidates(no_pidfile_candidates)
        }
    }
}

fn unit_name_from_script(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if !path.is_file() {
        return false;
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    // `.dpkg-*` and `~`-suffixed files are package-manager backups, never
    // executed.
    if name.ends_with('~') || name.contains(".dpkg-") {
        return false;
    }
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Parses lines of the form `TAG|value` from a hook's stdout.
fn parse_hook_output(stdout: &str) -> HookOutput {
    let mut output = HookOutput::default();
    for line in stdout.lines() {
        let Some((tag, value)) = line.split_once('|') else {
            continue;
        };
        match tag {
            "PACKAGE" => output.packages.push(value.trim().to_string()),
            "RC" => output.init_scripts.push(value.trim().to_string()),
            _ => {}
        }
    }
    output
}

/// Parses the `### BEGIN INIT INFO` / `### END INIT INFO` block. Returns
/// `None` if no recognizable header block is present — such scripts are
/// queued as "no-pidfile candidates" by the caller.
fn parse_lsb_header(script_text: &str) -> Option<LsbHeader> {
    let start = script_text.find("### BEGIN INIT INFO")?;
    let end = script_text[start..].find("### END INIT INFO")? + start;
    let block = &script_text[start..end];

    let mut header = LsbHeader::default();
    for line in block.lines() {
        let line = line.trim_start_matches('#').trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "provides" => header.provides = split_words(value),
            "required-start" => header.required_start = split_words(value),
            "required-stop" => header.required_stop = split_words(value),
            "default-start" => {
                header.default_start = value
                    .split_whitespace()
                    .filter_map(|v| v.parse::<u8>().ok())
                    .collect();
            }
            "short-description" => header.short_description = Some(value.to_string()),
            _ => {}
        }
    }
    Some(header)
}

fn split_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(|s| s.to_string()).collect()
}

/// Scans the remainder of an init script for any readable path matching
/// `*/run/*.pid`.
fn find_pidfiles(script_text: &str) -> Vec<PathBuf> {
    use regex::Regex;
    use std::sync::OnceLock;
    static PIDFILE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PIDFILE_RE.get_or_init(|| Regex::new(r"(/[\w./-]*run/[\w.-]+\.pid)").unwrap());

    let mut seen = BTreeMap::new();
    for cap in re.captures_iter(script_text) {
        let path = PathBuf::from(&cap[1]);
        seen.insert(cap[1].to_string(), path);
    }
    seen.into_values()
        .filter(|p| std::fs::metadata(p).is_ok())
        .collect()
}

/// True if `pidfile`'s integer content equals `pid`.
fn pidfile_matches(pidfile: &Path, pid: Pid) -> bool {
    std::fs::read_to_string(pidfile)
        .ok()
        .and_then(|s| s.trim().parse::<Pid>().ok())
        .map(|found| found == pid)
        .unwrap_or(false)
}
