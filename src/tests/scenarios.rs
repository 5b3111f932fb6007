use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::classify::StaleClassifier;
use crate::config::Config;
use crate::interp::InterpreterRegistry;
use crate::model::{ProcessRecord, ProcessTable};
use crate::proc::MappingInspector;
use crate::reducer::{alphabetic_systemd_units, StaleSetReducer};
use crate::resolver::{ResolveOutcome, ServiceResolver};

fn write_empty_maps(dir: &std::path::Path, pid: i32) {
    let pid_dir = dir.join(pid.to_string());
    std::fs::create_dir_all(&pid_dir).unwrap();
    std::fs::write(pid_dir.join("maps"), "").unwrap();
}

/// A hook's `RC` output names an init script whose LSB header matches
/// the current runlevel and whose pidfile matches the subject PID.
#[test]
fn pidfile_match_names_the_init_script() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    std::fs::create_dir_all(&run_dir).unwrap();
    let pidfile = run_dir.join("nginx.pid");
    std::fs::write(&pidfile, "4242").unwrap();

    let script_path = dir.path().join("nginx");
    std::fs::write(
        &script_path,
        format!(
            "#!/bin/sh\n### BEGIN INIT INFO\n# Default-Start: 2 3 4 5\n### END INIT INFO\nPIDFILE={}\n",
            pidfile.display()
        ),
    )
    .unwrap();

    let resolver = ServiceResolver::new(dir.path(), false);
    let outcome = resolver.resolve(
        &[script_path.to_string_lossy().into_owned()],
        3,
        4242,
    );
    match outcome {
        ResolveOutcome::PidfileMatch(name) => assert_eq!(name, "nginx"),
        other => panic!("expected PidfileMatch, got {other:?}"),
    }
}

/// Cgroup-based resolution names `sshd.service` for a stale PID whose
/// cgroup file places it under `system.slice/sshd.service`.
#[test]
fn cgroup_resolution_names_sshd_service() {
    let proc_dir = tempfile::tempdir().unwrap();
    let pid_dir = proc_dir.path().join("5000");
    std::fs::create_dir_all(&pid_dir).unwrap();
    std::fs::write(
        pid_dir.join("cgroup"),
        "1:name=systemd:/system.slice/sshd.service\n",
    )
    .unwrap();

    let mut table = ProcessTable::default();
    table.processes.insert(
        5000,
        ProcessRecord {
            pid: 5000,
            ppid: 1,
            uid: 0,
            start_time_ticks: 0,
            fname: "sshd".to_string(),
            exe_path: Some(PathBuf::from("/usr/sbin/sshd")),
            exe_deleted: false,
            tty_device: None,
            is_kernel_thread: false,
        },
    );

    let config = Config::defaults();
    let registry = InterpreterRegistry::with_builtins();
    let reducer = StaleSetReducer::new(&table, proc_dir.path(), &config, true, 3, &registry);
    let result = reducer.reduce(&[5000], None, true);

    assert_eq!(result.units.len(), 1);
    assert_eq!(result.units[0].key(), "sshd.service");
}

/// `systemctl_combine` aggregates every systemd unit into a single,
/// alphabetically-ordered `systemctl restart` argument list.
#[test]
fn systemctl_combine_orders_units_alphabetically() {
    use crate::model::RestartUnit;

    let units = vec![
        RestartUnit::SystemdService("foo.service".to_string()),
        RestartUnit::SystemdService("bar.service".to_string()),
    ];
    let names = alphabetic_systemd_units(&units);
    assert_eq!(names, vec!["bar.service", "foo.service"]);
}

/// A non-root user's stale Python process (script mtime newer than the
/// process start time) is classified stale via the interpreter check alone,
/// with no executable-mapping staleness involved.
#[test]
fn python_script_mtime_marks_process_stale() {
    let proc_dir = tempfile::tempdir().unwrap();
    write_empty_maps(proc_dir.path(), 7001);
    let pid_dir = proc_dir.path().join("7001");

    let script = proc_dir.path().join("app.py");
    std::fs::write(&script, "print('hi')\n").unwrap();

    std::fs::write(
        pid_dir.join("cmdline"),
        format!("python3\0{}\0", script.display()),
    )
    .unwrap();

    let record = ProcessRecord {
        pid: 7001,
        ppid: 1,
        uid: 1000,
        start_time_ticks: 0,
        fname: "python3".to_string(),
        exe_path: Some(PathBuf::from("/usr/bin/python3")),
        exe_deleted: false,
        tty_device: None,
        is_kernel_thread: false,
    };

    let blacklist = Vec::new();
    let registry = InterpreterRegistry::with_builtins();
    let classifier = StaleClassifier {
        mapping_inspector: MappingInspector::new(proc_dir.path(), &blacklist),
        interpreters: &registry,
        interpscan_enabled: true,
        proc_root: proc_dir.path(),
        // Process started long before the Unix epoch's midpoint so the
        // script file (written "now", during the test run) is always newer.
        btime: 0,
        ticks_per_sec: 100,
    };

    assert!(classifier.is_stale(&record));

    let mut outdated = BTreeMap::new();
    outdated.insert(record.fname.clone(), vec![record.pid]);
    assert_eq!(outdated.get("python3"), Some(&vec![7001]));
}
