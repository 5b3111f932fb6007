//! Session-notify dispatch. The notify helpers themselves are external
//! collaborators; this module only implements the calling contract:
//! natural-sorted execution, the four `NR_*` environment variables, and the
//! `~`/`.dpkg-*` exclusion.

use std::path::Path;
use std::process::Command;

use crate::model::Uid;
use crate::natord;

pub struct NotifyContext {
    pub uid: Uid,
    pub username: String,
    pub session: String,
    pub sess_ppid: String,
}

/// Runs notify helpers in `notify_d`, in natural order, until one exits
/// successfully. Helpers named with a trailing `~` or containing
/// `.dpkg-*` are ignored.
pub fn dispatch(notify_d: &Path, ctx: &NotifyContext) -> bool {
    let Ok(entries) = std::fs::read_dir(notify_d) else {
        return false;
    };
    let mut helpers: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| is_eligible_helper(p))
        .collect();
    natord::sort_by_key(&mut helpers, |p| p.to_string_lossy().into_owned());

    for helper in helpers {
        let status = Command::new(&helper)
            .env("NR_UID", ctx.uid.to_string())
            .env("NR_USERNAME", &ctx.username)
            .env("NR_SESSION", &ctx.session)
            .env("NR_SESSPPID", &ctx.sess_ppid)
            .status();
        match status {
            Ok(status) if status.success() => return true,
            Ok(status) => {
                log::debug!("notify helper {} exited with {status}", helper.display());
            }
            Err(e) => {
                log::warn!("failed to spawn notify helper {}: {e}", helper.display());
            }
        }
    }
    false
}

fn is_eligible_helper(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name.ends_with('~') || name.contains(".dpkg-") {
        return false;
    }
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_backup_and_dpkg_files() {
        assert!(!is_eligible_helper(Path::new("/etc/needrestart/notify.d/foo~")));
        assert!(!is_eligible_helper(Path::new(
            "/etc/needrestart/notify.d/foo.dpkg-old"
        )));
    }
}
