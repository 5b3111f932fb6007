//! Component D: container detector.
//!
//! Namespace comparison follows the same "compare the PID's identifiers
//! against PID 1's" idea the pack's `systemd-cgls` crate uses for grouping
//! cgroup hierarchies, applied here to PID/mount namespace inode numbers.
//! Cgroup path-fragment classification reuses the fragment vocabulary
//! `systemd-cgls` already recognizes for display (`docker/`, `lxc/`,
//! `machine.slice/`) for a functional decision instead.

use std::path::Path;

use regex::Regex;

use crate::model::Pid;

pub struct ContainerDetector<'a> {
    proc_root: &'a Path,
}

impl<'a> ContainerDetector<'a> {
    pub fn new(proc_root: &'a Path) -> Self {
        ContainerDetector { proc_root }
    }

    /// True if `pid` appears to live inside a container runtime: its PID or
    /// mount namespace differs from PID 1's, or its cgroup path carries a
    /// recognized container-runtime fragment.
    pub fn in_container(&self, pid: Pid) -> bool {
        // A distinct PID namespace from PID 1's is the strong signal — unlike
        // the mount namespace, ordinary host services do not usually get
        // their own PID namespace, only container runtimes do.
        if self.namespace_differs_from_init(pid, "pid") {
            return true;
        }
        if let Some(cgroup) = self.read_cgroup(pid) {
            if is_container_cgroup(&cgroup) {
                return true;
            }
        }
        false
    }

    fn namespace_differs_from_init(&self, pid: Pid, ns: &str) -> bool {
        let self_ns = self.read_namespace_id(pid, ns);
        let init_ns = self.read_namespace_id(1, ns);
        match (self_ns, init_ns) {
            (Some(a), Some(b)) => a != b,
            // Can't prove a difference without both identifiers.
            _ => false,
        }
    }

    fn read_namespace_id(&self, pid: Pid, ns: &str) -> Option<String> {
        let link = self
            .proc_root
            .join(pid.to_string())
            .join("ns")
            .join(ns);
        std::fs::read_link(&link)
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn read_cgroup(&self, pid: Pid) -> Option<String> {
        std::fs::read_to_string(self.proc_root.join(pid.to_string()).join("cgroup")).ok()
    }

    /// Containers whose init process is itself stale need restarting as a
    /// whole. `override_cont` (last matching pattern wins) forces a named
    /// container in or out of the result regardless of its init process's
    /// staleness.
    pub fn enumerate_containers(
        &self,
        pids: impl Iterator<Item = Pid>,
        is_stale_init: impl Fn(Pid) -> bool,
        override_cont: &[(Regex, bool)],
    ) -> Vec<(String, Vec<String>)> {
        let mut containers = Vec::new();
        for pid in pids {
            if !self.in_container(pid) {
                continue;
            }
            let Some(cgroup) = self.read_cgroup(pid) else {
                continue;
            };
            let Some(name) = container_name_from_cgroup(&cgroup) else {
                continue;
            };
            let wanted = match override_cont.iter().rev().find(|(re, _)| re.is_match(&name)) {
                Some((_, allow)) => *allow,
                None => is_stale_init(pid),
            };
            if wanted {
                containers.push((name.clone(), default_restart_argv(&name)));
            }
        }
        containers.sort();
        containers.dedup();
        containers
    }
}

fn default_restart_argv(name: &str) -> Vec<String> {
    vec!["docker".to_string(), "restart".to_string(), name.to_string()]
}

/// Path fragments that mark a cgroup path as belonging to a container
/// runtime rather than the host's own service tree. Deliberately excludes a
/// bare `.scope` suffix: ordinary systemd user-session scopes
/// (`session-<N>.scope`) and transient service scopes share that suffix and
/// are not containers.
const CONTAINER_CGROUP_FRAGMENTS: &[&str] = &["docker/", "docker-", "lxc/", "machine.slice/"];

fn is_container_cgroup(cgroup_text: &str) -> bool {
    cgroup_text
        .lines()
        .any(|line| CONTAINER_CGROUP_FRAGMENTS.iter().any(|frag| line.contains(frag)))
}

fn container_name_from_cgroup(cgroup_text: &str) -> Option<String> {
    for line in cgroup_text.lines() {
        if let Some(idx) = line.find("docker/") {
            let id = &line[idx + "docker/".len()..];
            return Some(id.chars().take(12).collect());
        }
        if let Some(idx) = line.find("lxc/") {
            let id = &line[idx + "lxc/".len()..];
            return Some(id.trim_matches('/').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_cgroup_is_container() {
        let text = "0::/system.slice/docker-abc123def456.scope\n";
        assert!(is_container_cgroup(text));
    }

    #[test]
    fn lxc_cgroup_is_container() {
        let text = "0::/lxc/mycontainer/init.scope\n";
        assert!(is_container_cgroup(text));
    }

    #[test]
    fn plain_service_cgroup_is_not_container() {
        let text = "0::/system.slice/sshd.service\n";
        assert!(!is_container_cgroup(text));
    }

    #[test]
    fn user_session_scope_is_not_container() {
        let text = "1:name=systemd:/user.slice/user-1000.slice/session-2.scope\n";
        assert!(!is_container_cgroup(text));
    }

    #[test]
    fn docker_cgroup_v2_scope_is_container() {
        let text = "0::/system.slice/docker-abc123def456.scope\n";
        assert!(is_container_cgroup(text));
    }

    #[test]
    fn extracts_lxc_container_name() {
        let text = "0::/lxc/mycontainer/init.scope\n";
        assert_eq!(
            container_name_from_cgroup(text),
            Some("mycontainer".to_string())
        );
    }

    fn write_pid_ns(proc_root: &Path, pid: Pid, ns_id: &str, cgroup: &str) {
        let pid_dir = proc_root.join(pid.to_string());
        std::fs::create_dir_all(pid_dir.join("ns")).unwrap();
        std::os::unix::fs::symlink(format!("pid:[{ns_id}]"), pid_dir.join("ns/pid")).unwrap();
        std::fs::write(pid_dir.join("cgroup"), cgroup).unwrap();
    }

    #[test]
    fn override_cont_false_excludes_stale_container() {
        let dir = tempfile::tempdir().unwrap();
        write_pid_ns(dir.path(), 1, "1", "0::/\n");
        write_pid_ns(dir.path(), 42, "2", "0::/lxc/mycontainer/init.scope\n");

        let detector = ContainerDetector::new(dir.path());
        let overrides = vec![(Regex::new("^mycontainer$").unwrap(), false)];
        let containers =
            detector.enumerate_containers(std::iter::once(42), |_| true, &overrides);
        assert!(containers.is_empty());
    }

    #[test]
    fn override_cont_true_includes_non_stale_container() {
        let dir = tempfile::tempdir().unwrap();
        write_pid_ns(dir.path(), 1, "1", "0::/\n");
        write_pid_ns(dir.path(), 42, "2", "0::/lxc/mycontainer/init.scope\n");

        let detector = ContainerDetector::new(dir.path());
        let overrides = vec![(Regex::new("^mycontainer$").unwrap(), true)];
        let containers =
            detector.enumerate_containers(std::iter::once(42), |_| false, &overrides);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].0, "mycontainer");
    }
}
