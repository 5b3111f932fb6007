//! Component G: kernel comparator.
//!
//! Enumerates installed kernel images under `/boot`, orders them by a
//! numeric version comparison (not string comparison) and compares the
//! result against the running kernel's `uname -r` and ABI tag.

use std::path::Path;

use crate::model::KernelStatus;

pub struct KernelComparator<'a> {
    boot_dir: &'a Path,
}

#[derive(Debug, Clone)]
pub struct KernelVersion {
    pub raw: String,
    /// Numeric components split on `.` and `-`, for ordering.
    components: Vec<u64>,
    /// Trailing non-numeric ABI/flavor tag, e.g. `-amd64`, `-generic`.
    abi_tag: String,
}

impl KernelVersion {
    pub fn parse(raw: &str) -> KernelVersion {
        let mut components = Vec::new();
        let mut abi_parts = Vec::new();
        for part in raw.split(['.', '-']) {
            if let Ok(n) = part.parse::<u64>() {
                components.push(n);
            } else if !part.is_empty() {
                abi_parts.push(part);
            }
        }
        KernelVersion {
            raw: raw.to_string(),
            components,
            abi_tag: abi_parts.join("-"),
        }
    }

    /// Same numeric base (all numeric components equal) but different ABI
    /// tag text.
    pub fn same_base_different_abi(&self, other: &KernelVersion) -> bool {
        self.components == other.components && self.abi_tag != other.abi_tag
    }
}

impl PartialEq for KernelVersion {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components && self.abi_tag == other.abi_tag
    }
}
impl Eq for KernelVersion {}

impl PartialOrd for KernelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for KernelVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.components
            .cmp(&other.components)
            .then_with(|| self.abi_tag.cmp(&other.abi_tag))
    }
}

impl<'a> KernelComparator<'a> {
    pub fn new(boot_dir: &'a Path) -> Self {
        KernelComparator { boot_dir }
    }

    /// Reads the running kernel's release string (`uname -r`), which already
    /// packs version and ABI tag together (e.g. `5.10.0-21-amd64`).
    pub fn running_version(&self) -> Option<KernelVersion> {
        let uname = nix::sys::utsname::uname().ok()?;
        let release = uname.release().to_string_lossy().into_owned();
        Some(KernelVersion::parse(&release))
    }

    /// Scans `/boot` for `vmlinuz-<version>` images (Debian/Ubuntu naming)
    /// and `vmlinuz-<version>.<arch>` (RPM naming), returning the
    /// lexicographically-by-numeric-version greatest.
    pub fn newest_installed(&self) -> Option<KernelVersion> {
        let entries = std::fs::read_dir(self.boot_dir).ok()?;
        let mut versions = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(version) = name.strip_prefix("vmlinuz-") {
                versions.push(KernelVersion::parse(version));
            }
        }
        versions.into_iter().max()
    }

    /// Compares running vs. newest installed, yielding one of four
    /// outcomes: no upgrade, an ABI-only upgrade, a version upgrade, or
    /// unknown.
    pub fn compare(&self) -> KernelStatus {
        let Some(running) = self.running_version() else {
            return KernelStatus::Unknown;
        };
        let Some(newest) = self.newest_installed() else {
            return KernelStatus::Unknown;
        };
        if running == newest {
            KernelStatus::NoUpgrade
        } else if running.same_base_different_abi(&newest) {
            KernelStatus::AbiUpgrade
        } else {
            KernelStatus::VerUpgrade
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ordering_beats_string_ordering() {
        // "5.9.0" would sort after "5.10.0" lexically; numerically it must
        // sort before.
        let a = KernelVersion::parse("5.9.0-1-amd64");
        let b = KernelVersion::parse("5.10.0-1-amd64");
        assert!(a < b);
    }

    #[test]
    fn same_base_different_abi_detected() {
        let a = KernelVersion::parse("5.10.0-21-amd64");
        let b = KernelVersion::parse("5.10.0-23-amd64");
        assert!(!a.same_base_different_abi(&b)); // differing numeric component too
    }

    #[test]
    fn abi_only_difference() {
        // Identical numeric version, different flavor.
        let a = KernelVersion::parse("5.10.21-generic");
        let b = KernelVersion::parse("5.10.21-lowlatency");
        assert!(a.same_base_different_abi(&b));
    }

    #[test]
    fn newest_installed_reads_vmlinuz_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vmlinuz-5.10.0-23-amd64"), b"").unwrap();
        let comparator = KernelComparator::new(dir.path());
        let newest = comparator.newest_installed().unwrap();
        assert_eq!(newest.raw, "5.10.0-23-amd64");
    }

    #[test]
    fn unknown_when_no_kernels_installed() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = KernelComparator::new(dir.path());
        assert!(comparator.newest_installed().is_none());
    }
}
