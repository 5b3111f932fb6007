//! Boot-relative clock helpers shared by the process table reader and the
//! interpreter registry.
//!
//! The comparison "script mtime > process start time" must be evaluated
//! against *the same clock source*: boot-relative seconds derived from
//! `/proc/stat` `btime` plus the per-process start-ticks divided by
//! ticks-per-second. Both quantities are read here so every caller shares
//! one conversion.

use std::io;

/// `sysconf(_SC_CLK_TCK)`, the number of `/proc/<pid>/stat` ticks per
/// second.
pub fn ticks_per_second() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 {
        100
    } else {
        ticks as u64
    }
}

/// System boot time, in seconds since the Unix epoch, read from the `btime`
/// line of `/proc/stat`.
pub fn boot_time_secs(proc_root: &std::path::Path) -> io::Result<u64> {
    let text = std::fs::read_to_string(proc_root.join("stat"))?;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("btime ") {
            return rest
                .trim()
                .parse::<u64>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "no btime line in /proc/stat",
    ))
}

/// Converts a process's `start_time` (ticks since boot, `/proc/<pid>/stat`
/// field 22) into wall-clock seconds using `btime` + ticks/Hz.
pub fn process_start_wallclock(start_time_ticks: u64, btime: u64, ticks_per_sec: u64) -> u64 {
    let ticks_per_sec = ticks_per_sec.max(1);
    btime + start_time_ticks / ticks_per_sec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_ticks_to_wallclock() {
        // 100 Hz clock, process started 500 ticks (5s) after boot at btime 1000.
        assert_eq!(process_start_wallclock(500, 1_000, 100), 1_005);
    }

    #[test]
    fn ticks_per_second_is_sane() {
        assert!(ticks_per_second() > 0);
    }
}
