//! Batch-mode and Nagios plugin-mode output formatting.
//!
//! The dialog/advanced-summary UI itself is an external collaborator; this
//! module only renders the two machine-readable formats the core is
//! responsible for.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::kernel::KernelVersion;
use crate::model::{KernelStatus, Pid, RestartUnit};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub struct KernelReport {
    pub running: Option<KernelVersion>,
    pub newest: Option<KernelVersion>,
    pub status: KernelStatus,
}

/// Renders the `NEEDRESTART-*` batch lines. `outdated_pids` maps a short
/// command name to the PIDs running it, for the user-mode `NEEDRESTART-PID`
/// line.
pub fn render_batch(
    units: &[RestartUnit],
    containers: &[(String, Vec<String>)],
    kernel: Option<&KernelReport>,
    outdated_pids: &BTreeMap<String, Vec<Pid>>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "NEEDRESTART-VER: {VERSION}");

    if let Some(kernel) = kernel {
        if let Some(running) = &kernel.running {
            let _ = writeln!(out, "NEEDRESTART-KCUR: {}", running.raw);
        }
        if let Some(newest) = &kernel.newest {
            let _ = writeln!(out, "NEEDRESTART-KEXP: {}", newest.raw);
        }
        let _ = writeln!(out, "NEEDRESTART-KSTA: {}", kernel.status.code());
    }

    for unit in units {
        if unit.is_service_like() || matches!(unit, RestartUnit::SystemdManager | RestartUnit::SysVInit) {
            let _ = writeln!(out, "NEEDRESTART-SVC: {}", unit.key());
        }
    }

    for (name, _) in containers {
        let _ = writeln!(out, "NEEDRESTART-CONT: {name}");
    }

    for (command, pids) in outdated_pids {
        let pid_list = pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(out, "NEEDRESTART-PID: {command}={pid_list}");
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NagiosState {
    Ok = 0,
    Warn = 1,
    Crit = 2,
    Unknown = 3,
}

impl NagiosState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            NagiosState::Ok => "OK",
            NagiosState::Warn => "WARNING",
            NagiosState::Crit => "CRITICAL",
            NagiosState::Unknown => "UNKNOWN",
        }
    }
}

/// Single-line Nagios plugin summary plus perfdata. The returned state is
/// the max of the per-category states (the highest of the enabled
/// per-category Nagios returns).
pub fn render_plugin(
    kernel_status: KernelStatus,
    service_count: usize,
    container_count: usize,
    session_count: usize,
) -> (NagiosState, String) {
    let kernel_state = match kernel_status {
        KernelStatus::NoUpgrade => NagiosState::Ok,
        KernelStatus::AbiUpgrade => NagiosState::Warn,
        KernelStatus::VerUpgrade => NagiosState::Warn,
        KernelStatus::Unknown => NagiosState::Unknown,
    };
    let services_state = if service_count > 0 { NagiosState::Warn } else { NagiosState::Ok };
    let sessions_state = if session_count > 0 { NagiosState::Warn } else { NagiosState::Ok };

    let overall = [kernel_state, services_state, sessions_state]
        .into_iter()
        .max()
        .unwrap_or(NagiosState::Ok);

    let services_flag = if service_count > 0 { " (!)" } else { "" };
    let sessions_flag = if session_count > 0 { " (!)" } else { "" };

    let line = format!(
        "{} - Kernel: {:?}, Services: {service_count}{services_flag}, Containers: {container_count}, Sessions: {session_count}{sessions_flag}|Kernel={:?} Services={service_count} Containers={container_count} Sessions={session_count}",
        overall.label(),
        kernel_status,
        kernel_status,
    );
    (overall, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_includes_version_line() {
        let out = render_batch(&[], &[], None, &BTreeMap::new());
        assert!(out.starts_with("NEEDRESTART-VER: "));
    }

    #[test]
    fn batch_renders_service_and_pid_lines() {
        let units = vec![RestartUnit::SystemdService("nginx.service".to_string())];
        let mut pids = BTreeMap::new();
        pids.insert("python3".to_string(), vec![7001]);
        let out = render_batch(&units, &[], None, &pids);
        assert!(out.contains("NEEDRESTART-SVC: nginx.service"));
        assert!(out.contains("NEEDRESTART-PID: python3=7001"));
    }

    #[test]
    fn kernel_status_version_upgrade_lines() {
        let report = KernelReport {
            running: Some(KernelVersion::parse("5.10.0-21-amd64")),
            newest: Some(KernelVersion::parse("5.10.0-23-amd64")),
            status: KernelStatus::VerUpgrade,
        };
        let out = render_batch(&[], &[], Some(&report), &BTreeMap::new());
        assert!(out.contains("NEEDRESTART-KCUR: 5.10.0-21-amd64"));
        assert!(out.contains("NEEDRESTART-KEXP: 5.10.0-23-amd64"));
        assert!(out.contains("NEEDRESTART-KSTA: 2"));
    }

    #[test]
    fn plugin_state_is_max_of_categories() {
        let (state, line) = render_plugin(KernelStatus::NoUpgrade, 2, 0, 0);
        assert_eq!(state, NagiosState::Warn);
        assert!(line.starts_with("WARNING"));
    }

    #[test]
    fn plugin_unknown_kernel_dominates() {
        let (state, _) = render_plugin(KernelStatus::Unknown, 0, 0, 0);
        assert_eq!(state, NagiosState::Unknown);
    }
}
