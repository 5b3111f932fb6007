//! Driver: wires the process table reader, mapping inspector, interpreter
//! registry, container detector, stale-set reducer, service resolver and
//! kernel comparator into a single-threaded, synchronous pipeline: the
//! process table feeds the mapping inspector and interpreter registry,
//! which feed the reducer; the reducer consults the resolver to name units;
//! the container detector gates both the reducer and the kernel comparator.

mod cli;
mod classify;
mod clock;
mod config;
mod container;
mod error;
mod interp;
mod kernel;
mod logging;
mod model;
mod natord;
mod notify;
mod output;
mod proc;
mod reducer;
mod resolver;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Parser;

use cli::Cli;
use config::Config;
use container::ContainerDetector;
use error::NeedrestartError;
use model::{KernelStatus, Pid, RestartUnit};
use output::KernelReport;
use proc::{MappingInspector, ProcessTableReader};

const PROC_ROOT: &str = "/proc";

fn main() {
    let cli = Cli::parse();
    logging::setup(cli.verbosity());

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("[main] {e}");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<i32, NeedrestartError> {
    let euid = nix::unistd::geteuid();
    let is_root = euid.is_root();

    if cli.plugin && !is_root {
        println!("UNKN - needrestart must run as root in plugin mode");
        return Ok(3);
    }

    let config = load_config(cli)?;
    if let Some(frontend) = &cli.frontend {
        // The dialog/advanced-summary UI is an external collaborator (spec
        // §1); `-f` only needs to make its choice visible to that process.
        std::env::set_var("NEEDRESTART_FRONTEND", frontend);
    }
    let proc_root = Path::new(PROC_ROOT);

    let self_pid = std::process::id() as Pid;
    let self_ppid = read_self_ppid(proc_root).unwrap_or(self_pid);

    let table = ProcessTableReader::new(proc_root).snapshot();
    let container_detector = ContainerDetector::new(proc_root);

    let btime = clock::boot_time_secs(proc_root).unwrap_or(0);
    let ticks_per_sec = clock::ticks_per_second();
    let interpreters = interp::InterpreterRegistry::with_builtins();
    let mapping_inspector = MappingInspector::new(proc_root, &config.blacklist);
    let classifier = classify::StaleClassifier {
        mapping_inspector,
        interpreters: &interpreters,
        interpscan_enabled: config.interpscan,
        proc_root,
        btime,
        ticks_per_sec,
    };

    let target_uid = if is_root { None } else { Some(euid.as_raw()) };

    // `-k` is implicitly off for non-root (spec.md §6): a non-root caller
    // always gets the process/library scan regardless of the flag.
    let kernel_only = cli.kernel_only && is_root;

    let mut stale_pids = Vec::new();
    if !kernel_only {
        for record in table.processes.values() {
            if record.is_kernel_thread {
                continue;
            }
            if record.pid == self_pid || record.pid == self_ppid {
                continue;
            }
            if classifier.is_stale(record) {
                stale_pids.push(record.pid);
            }
        }
    }

    if is_root {
        // The resolver only ever runs during root's pass-2 reduction; an
        // unreadable hook directory is fatal there (spec.md §7), distinct
        // from a single hook's own failure, which is logged and skipped.
        resolver::ServiceResolver::validate_hook_dir(&config.hook_d)?;
    }

    let current_runlevel = detect_runlevel();
    let systemd_host = is_systemd_host();

    let reducer =
        reducer::StaleSetReducer::new(&table, proc_root, &config, is_root, current_runlevel, &interpreters);
    let reduction = reducer.reduce(&stale_pids, target_uid, systemd_host);

    let containers = container_detector.enumerate_containers(
        table.processes.keys().copied(),
        |pid| {
            table
                .get(pid)
                .map(|record| classifier.is_stale(record))
                .unwrap_or(false)
        },
        &config.override_cont,
    );

    let pid1_containerized = container_detector.in_container(1);
    let kernel_report = if !cli.library_only
        && !pid1_containerized
        && config.kernelhints != config::KernelHints::Off
    {
        Some(build_kernel_report())
    } else {
        None
    };

    let outdated_pids = outdated_pid_map(&table, &reduction.outdated_pids, target_uid);

    if cli.plugin {
        let status = kernel_report.as_ref().map(|r| r.status).unwrap_or(KernelStatus::Unknown);
        let session_count = reduction
            .units
            .iter()
            .filter(|u| matches!(u, RestartUnit::UserSession { .. }))
            .count();
        let (state, line) = output::render_plugin(status, reduction.units.len(), containers.len(), session_count);
        println!("{line}");
        return Ok(state.code());
    }

    if cli.batch_mode() {
        let batch = output::render_batch(&reduction.units, &containers, kernel_report.as_ref(), &outdated_pids);
        print!("{batch}");
    } else {
        print_human_summary(
            &reduction.units,
            &containers,
            kernel_report.as_ref(),
            &outdated_pids,
            config.kernelhints,
        );
    }

    if config.restart == config::RestartMode::Automatic {
        perform_restarts(&reduction.units, &config);
    }

    if config.sendnotify {
        dispatch_notifications(&config, &outdated_pids, target_uid);
    }

    Ok(0)
}

fn load_config(cli: &Cli) -> Result<Config, NeedrestartError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None if cli.batch_mode() => Config::defaults(),
        None => {
            return Err(NeedrestartError::UsageError(
                "-c <path> is required unless -b is given".to_string(),
            ))
        }
    };
    config.apply_cli_overrides(
        cli.restart.as_deref(),
        cli.ui_mode.as_deref(),
        cli.default_no,
        cli.verbosity_override(),
    )?;
    Ok(config)
}

fn read_self_ppid(proc_root: &Path) -> Option<Pid> {
    ProcessTableReader::new(proc_root)
        .read_one(std::process::id() as Pid)
        .ok()
        .map(|r| r.ppid)
}

/// Reads the current SysV runlevel via the `runlevel` utility's `"N 3"`
/// style output, falling back to runlevel 3 if the command is unavailable
/// (most containers and systemd-only hosts have no such concept).
fn detect_runlevel() -> u8 {
    if let Ok(output) = Command::new("runlevel").output() {
        if let Some(token) = String::from_utf8_lossy(&output.stdout).split_whitespace().last() {
            if let Ok(level) = token.parse::<u8>() {
                return level;
            }
        }
    }
    3
}

fn is_systemd_host() -> bool {
    Path::new("/run/systemd/system").is_dir()
}

fn build_kernel_report() -> KernelReport {
    let comparator = kernel::KernelComparator::new(Path::new("/boot"));
    let running = comparator.running_version();
    let newest = comparator.newest_installed();
    let status = comparator.compare();
    KernelReport {
        running,
        newest,
        status,
    }
}

fn outdated_pid_map(
    table: &model::ProcessTable,
    pids: &[Pid],
    target_uid: Option<u32>,
) -> BTreeMap<String, Vec<Pid>> {
    let mut map: BTreeMap<String, Vec<Pid>> = BTreeMap::new();
    for &pid in pids {
        let Some(record) = table.get(pid) else { continue };
        if let Some(uid) = target_uid {
            if record.uid != uid {
                continue;
            }
        }
        map.entry(record.fname.clone()).or_default().push(pid);
    }
    for pids in map.values_mut() {
        pids.sort_unstable();
    }
    map
}

fn print_human_summary(
    units: &[RestartUnit],
    containers: &[(String, Vec<String>)],
    kernel: Option<&KernelReport>,
    outdated_pids: &BTreeMap<String, Vec<Pid>>,
    kernelhints: config::KernelHints,
) {
    if units.is_empty() && containers.is_empty() && outdated_pids.is_empty() {
        println!("No services need to be restarted.");
    } else {
        println!("Services to be restarted:");
        for unit in units {
            println!("  {}", unit.key());
        }
        for (name, _) in containers {
            println!("Container to be restarted: {name}");
        }
        for (command, pids) in outdated_pids {
            let pid_list = pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ");
            println!("Outdated process: {command} (pid {pid_list})");
        }
    }
    if let Some(kernel) = kernel {
        match kernelhints {
            // `kernelhints = -1`: terse text only, no per-status sentence.
            config::KernelHints::Terse => println!("Kernel: {}", terse_kernel_label(kernel.status)),
            config::KernelHints::Full => match kernel.status {
                KernelStatus::NoUpgrade => println!("Kernel is up to date."),
                KernelStatus::AbiUpgrade => {
                    println!("An ABI upgrade of the running kernel is available.")
                }
                KernelStatus::VerUpgrade => println!("A newer kernel version is available."),
                KernelStatus::Unknown => println!("Kernel status unknown."),
            },
            // The kernel report is never built when hints are off (see the
            // `kernel_report` gate in `run()`).
            config::KernelHints::Off => {}
        }
    }
}

fn terse_kernel_label(status: KernelStatus) -> &'static str {
    match status {
        KernelStatus::NoUpgrade => "current",
        KernelStatus::AbiUpgrade => "abi upgrade",
        KernelStatus::VerUpgrade => "version upgrade",
        KernelStatus::Unknown => "unknown",
    }
}

/// Issues the actual restart commands in automatic mode. `systemctl_combine`
/// aggregates every systemd unit into a single `systemctl restart` call in
/// alphabetic order; other unit kinds each get their own invocation.
fn perform_restarts(units: &[RestartUnit], config: &Config) {
    let systemd_units = reducer::alphabetic_systemd_units(units);

    if config.systemctl_combine && !systemd_units.is_empty() {
        let mut args = vec!["restart"];
        args.extend(systemd_units.iter().copied());
        run_restart_command("systemctl", &args);
    } else {
        for &name in &systemd_units {
            run_restart_command("systemctl", &["restart", name]);
        }
    }

    for unit in units {
        match unit {
            RestartUnit::SystemdService(_) => {}
            RestartUnit::SystemdManager => run_restart_command("systemctl", &["daemon-reexec"]),
            RestartUnit::SysVInit => run_restart_command("telinit", &["q"]),
            RestartUnit::InitScript { name, .. } => {
                let script = format!("/etc/init.d/{name}");
                run_restart_command(&script, &["restart"]);
            }
            RestartUnit::UserSession { .. } => {}
            RestartUnit::Container { restart_argv, .. } => {
                if let Some((program, args)) = restart_argv.split_first() {
                    run_restart_command(program, &args.iter().map(String::as_str).collect::<Vec<_>>());
                }
            }
        }
    }
}

fn run_restart_command(program: &str, args: &[&str]) {
    let resolved = which::which(program).unwrap_or_else(|_| PathBuf::from(program));
    log::info!("restart: {} {}", resolved.display(), args.join(" "));
    if let Err(e) = Command::new(&resolved).args(args).status() {
        log::warn!("failed to run {}: {e}", resolved.display());
    }
}

fn dispatch_notifications(
    config: &Config,
    outdated_pids: &BTreeMap<String, Vec<Pid>>,
    target_uid: Option<u32>,
) {
    let Some(uid) = target_uid else { return };
    if outdated_pids.is_empty() {
        return;
    }
    let username = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| uid.to_string());
    let ctx = notify::NotifyContext {
        uid,
        username,
        session: std::env::var("XDG_SESSION_ID").unwrap_or_default(),
        sess_ppid: std::process::id().to_string(),
    };
    notify::dispatch(&config.notify_d, &ctx);
}
