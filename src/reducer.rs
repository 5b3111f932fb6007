//! Stale-set reducer.
//!
//! Two-pass collapse of stale PIDs into a minimal restartable-unit set.
//! Pass 1 runs for every caller; pass 2 (cgroup/systemd unit naming) only
//! runs when running as root.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use regex::Regex;

use crate::config::Config;
use crate::container::ContainerDetector;
use crate::interp::InterpreterRegistry;
use crate::model::{Pid, ProcessTable, RestartUnit, Uid};
use crate::resolver::{ResolveOutcome, ServiceResolver};

pub struct StaleSetReducer<'a> {
    pub table: &'a ProcessTable,
    pub container_detector: ContainerDetector<'a>,
    pub proc_root: &'a Path,
    pub config: &'a Config,
    pub is_root: bool,
    pub current_runlevel: u8,
    pub interpreters: &'a InterpreterRegistry,
}

impl<'a> StaleSetReducer<'a> {
    pub fn new(
        table: &'a ProcessTable,
        proc_root: &'a Path,
        config: &'a Config,
        is_root: bool,
        current_runlevel: u8,
        interpreters: &'a InterpreterRegistry,
    ) -> Self {
        StaleSetReducer {
            table,
            container_detector: ContainerDetector::new(proc_root),
            proc_root,
            config,
            is_root,
            current_runlevel,
            interpreters,
        }
    }

    /// Runs the full two-pass reduction. `stale_pids` are the PIDs the
    /// classifier flagged as stale, already filtered to `target_uid` (or
    /// unfiltered in root mode) and with `self`/`parent-of-self` excluded
    /// by the caller.
    pub fn reduce(
        &self,
        stale_pids: &[Pid],
        target_uid: Option<Uid>,
        systemd_host: bool,
    ) -> ReductionResult {
        let mut user_sessions: BTreeMap<(Uid, String), BTreeMap<String, Vec<Pid>>> =
            BTreeMap::new();
        let mut outdated_pids: Vec<Pid> = Vec::new();
        let mut stage_two: Vec<Pid> = Vec::new();

        // Pass 1.
        for &pid in stale_pids {
            let Some(record) = self.table.get(pid) else {
                continue;
            };
            if let Some(uid) = target_uid {
                if record.uid != uid {
                    // User mode never surfaces another uid's processes.

                    continue;
                }
            }
            if self.container_detector.in_container(pid) {
                // Container-resident stale PIDs never produce host units
                // (dedup rule c).
                continue;
            }

            if let Some(tty) = &record.tty_device {
                if !systemd_host {
                    let key = (record.uid, tty.to_string_lossy().into_owned());
                    user_sessions
                        .entry(key)
                        .or_default()
                        .entry(record.fname.clone())
                        .or_default()
                        .push(pid);
                    outdated_pids.push(pid);
                    continue;
                }
            }

            if record.ppid != 1 && record.ppid != pid {
                if let Some(parent) = self.table.get(record.ppid) {
                    if parent.uid == record.uid {
                        stage_two.push(record.ppid);
                        outdated_pids.push(pid);
                        continue;
                    }
                }
                // Parent owned by a different uid (or missing): record the
                // PID itself instead.
                stage_two.push(pid);
                outdated_pids.push(pid);
                continue;
            }

            stage_two.push(pid);
            outdated_pids.push(pid);
        }

        let mut units: Vec<RestartUnit> = Vec::new();
        for (uid, session_id) in user_sessions.keys() {
            let commands = user_sessions[&(*uid, session_id.clone())].clone();
            units.push(RestartUnit::UserSession {
                uid: *uid,
                session_id: session_id.clone(),
                commands,
            });
        }

        // Pass 2: root only.
        if self.is_root {
            let resolver = ServiceResolver::new(&self.config.hook_d, self.config.verbosity >= 2);
            for &pid in &stage_two {
                if let Some(unit) = self.resolve_stage_two(pid, systemd_host, &resolver) {
                    units.push(unit);
                }
            }
        }

        dedup_units(&mut units, &self.config.blacklist_rc, &self.config.override_rc);

        ReductionResult {
            units,
            outdated_pids,
        }
    }

    fn resolve_stage_two(
        &self,
        pid: Pid,
        systemd_host: bool,
        resolver: &ServiceResolver<'_>,
    ) -> Option<RestartUnit> {
        if systemd_host {
            if pid == 1 {
                if let Some(record) = self.table.get(1) {
                    if let Some(exe) = &record.exe_path {
                        if is_systemd_manager_exe(exe) {
                            return Some(RestartUnit::SystemdManager);
                        }
                    }
                }
            }
            return self.resolve_via_cgroup(pid).or_else(|| {
                self.resolve_via_systemctl_status(pid)
            });
        }

        if pid == 1 {
            if let Some(record) = self.table.get(1) {
                if record
                    .exe_path
                    .as_ref()
                    .map(|e| e.starts_with("/sbin/init"))
                    .unwrap_or(false)
                {
                    return Some(RestartUnit::SysVInit);
                }
            }
        }

        let record = self.table.get(pid)?;
        let exe = record.exe_path.as_ref()?;
        // Interpreted services (a script started via `python3 app.py`) must
        // be named after the script, not the interpreter binary itself.
        let resolve_target = self
            .interpreters
            .source_of(self.proc_root, pid, Some(exe.as_path()), &record.fname)
            .unwrap_or_else(|| exe.clone());
        let hooks = resolver.run_hooks(&resolve_target).ok()?;
        let init_scripts: Vec<String> = hooks.iter().flat_map(|h| h.init_scripts.clone()).collect();
        match resolver.resolve(&init_scripts, self.current_runlevel, pid) {
            ResolveOutcome::PidfileMatch(name) => Some(RestartUnit::InitScript {
                name,
                has_lsb: true,
                default_start_runlevels: vec![],
                pidfiles: vec![],
            }),
            ResolveOutcome::NoPidfileCandidates(names) => names.into_iter().next().map(|name| {
                RestartUnit::InitScript {
                    name,
                    has_lsb: false,
                    default_start_runlevels: vec![],
                    pidfiles: vec![],
                }
            }),
            ResolveOutcome::Unresolved => None,
        }
    }

    /// Reads `/proc/<pid>/cgroup` and recognizes three patterns:
    /// `user-<uid>.slice/session-<N>.scope`, `user@<uid>.service`, or any
    /// path ending `.../<unit>.service`.
    fn resolve_via_cgroup(&self, pid: Pid) -> Option<RestartUnit> {
        let text = std::fs::read_to_string(self.proc_root.join(pid.to_string()).join("cgroup")).ok()?;
        for line in text.lines() {
            if let Some(captures) = session_scope_re().captures(line) {
                let uid: Uid = captures[1].parse().ok()?;
                let session = captures[2].to_string();
                let record = self.table.get(pid)?;
                let mut commands = BTreeMap::new();
                commands.insert(record.fname.clone(), vec![pid]);
                return Some(RestartUnit::UserSession {
                    uid,
                    session_id: session,
                    commands,
                });
            }
            if let Some(captures) = user_manager_service_re().captures(line) {
                let uid: Uid = captures[1].parse().ok()?;
                return Some(RestartUnit::SystemdService(format!(
                    "user@{uid}.service"
                )));
            }
            if let Some(captures) = unit_service_re().captures(line) {
                return Some(RestartUnit::SystemdService(captures[1].to_string()));
            }
        }
        None
    }

    /// Fallback when cgroup parsing fails: invoke `systemctl status <pid>`
    /// and extract the first `<name>.service` token from its first output
    /// line.
    fn resolve_via_systemctl_status(&self, pid: Pid) -> Option<RestartUnit> {
        let output = Command::new("systemctl")
            .arg("status")
            .arg(pid.to_string())
            .output()
            .ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        let first_line = text.lines().next()?;
        let name = unit_service_token_re().find(first_line)?.as_str();
        Some(RestartUnit::SystemdService(name.to_string()))
    }
}

fn is_systemd_manager_exe(exe: &Path) -> bool {
    let s = exe.to_string_lossy();
    s.contains("/lib/systemd/systemd") || s.ends_with("/systemd")
}

fn session_scope_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"user-(\d+)\.slice/session-([\w.-]+)\.scope").unwrap())
}

fn user_manager_service_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"user@(\d+)\.service").unwrap())
}

fn unit_service_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\w.@-]+\.service)$").unwrap())
}

fn unit_service_token_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w.@-]+\.service").unwrap())
}

#[derive(Debug, Default)]
pub struct ReductionResult {
    pub units: Vec<RestartUnit>,
    pub outdated_pids: Vec<Pid>,
}

/// Extracts and alphabetically sorts the `SystemdService` unit names, for
/// `systemctl_combine`'s single aggregate `systemctl restart A B C`
/// invocation.
pub fn alphabetic_systemd_units(units: &[RestartUnit]) -> Vec<&str> {
    let mut names: Vec<&str> = units
        .iter()
        .filter_map(|u| match u {
            RestartUnit::SystemdService(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();
    names.sort_unstable();
    names
}

/// Applies the dedup rules: an `override_rc` match (last pattern wins, same
/// as config-file key ordering) forces the unit in or out regardless of
/// `blacklist_rc`; otherwise drop a unit whose name matches `blacklist_rc`;
/// finally drop a bare unit name when its `.service`-suffixed form is also
/// present.
pub fn dedup_units(units: &mut Vec<RestartUnit>, blacklist_rc: &[Regex], override_rc: &[(Regex, bool)]) {
    units.retain(|u| {
        let key = u.key();
        if let Some((_, allow)) = override_rc.iter().rev().find(|(re, _)| re.is_match(&key)) {
            return *allow;
        }
        !blacklist_rc.iter().any(|re| re.is_match(&key))
    });

    let service_names: std::collections::HashSet<String> = units
        .iter()
        .filter_map(|u| match u {
            RestartUnit::SystemdService(name) if name.ends_with(".service") => {
                Some(name.trim_end_matches(".service").to_string())
            }
            _ => None,
        })
        .collect();

    units.retain(|u| match u {
        RestartUnit::SystemdService(name) if !name.ends_with(".service") => {
            !service_names.contains(name.as_str())
        }
        RestartUnit::InitScript { name, .. } => !service_names.contains(name.as_str()),
        _ => true,
    });

    let mut seen = std::collections::HashSet::new();
    units.retain(|u| seen.insert(u.key()));
}
