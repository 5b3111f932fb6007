//! Declarative configuration file loading.
//!
//! `needrestart.conf` is a plain TOML document, not executable code: the
//! parser rejects any key it doesn't recognize rather than evaluating
//! arbitrary expressions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

/// `kernelhints` is a tri-state: `true` (full hints), `false` (off), or the
/// integer `-1` (terse text only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelHints {
    #[default]
    Full,
    Terse,
    Off,
}

impl<'de> Deserialize<'de> for KernelHints {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(KernelHints::Full),
            Raw::Bool(false) => Ok(KernelHints::Off),
            Raw::Int(-1) => Ok(KernelHints::Terse),
            Raw::Int(other) => Err(serde::de::Error::custom(format!(
                "kernelhints: expected true, false or -1, got {other}"
            ))),
        }
    }
}

fn default_hook_d() -> PathBuf {
    PathBuf::from("/etc/needrestart/hook.d")
}

fn default_notify_d() -> PathBuf {
    PathBuf::from("/etc/needrestart/notify.d")
}

fn default_true() -> bool {
    true
}

fn parse_restart_mode(s: &str) -> Result<RestartMode, String> {
    match s {
        "l" => Ok(RestartMode::ListOnly),
        "i" => Ok(RestartMode::Interactive),
        "a" => Ok(RestartMode::Automatic),
        other => Err(format!("restart: expected l|i|a, got {other}")),
    }
}

fn parse_ui_mode(s: &str) -> Result<UiMode, String> {
    match s {
        "e" => Ok(UiMode::Easy),
        "a" => Ok(UiMode::Advanced),
        other => Err(format!("ui_mode: expected e|a, got {other}")),
    }
}

/// The raw, serde-deserialized shape of a `needrestart.conf` file. Every
/// field is optional; absent fields take the defaults documented on `Config`.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    verbosity: Option<u8>,
    hook_d: Option<PathBuf>,
    notify_d: Option<PathBuf>,
    sendnotify: Option<bool>,
    restart: Option<String>,
    defno: Option<bool>,
    ui_mode: Option<String>,
    systemctl_combine: Option<bool>,
    #[serde(default)]
    blacklist: Vec<String>,
    #[serde(default)]
    blacklist_rc: Vec<String>,
    #[serde(default)]
    override_rc: HashMap<String, bool>,
    #[serde(default)]
    override_cont: HashMap<String, bool>,
    interpscan: Option<bool>,
    kernelhints: Option<KernelHints>,
}

/// Immutable configuration, assembled once after CLI + file parsing and
/// passed by reference to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub verbosity: u8,
    pub hook_d: PathBuf,
    pub notify_d: PathBuf,
    pub sendnotify: bool,
    pub restart: RestartMode,
    pub defno: bool,
    pub ui_mode: UiMode,
    pub systemctl_combine: bool,
    pub blacklist: Vec<Regex>,
    pub blacklist_rc: Vec<Regex>,
    pub override_rc: Vec<(Regex, bool)>,
    pub override_cont: Vec<(Regex, bool)>,
    pub interpscan: bool,
    pub kernelhints: KernelHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    ListOnly,
    Interactive,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMode {
    Easy,
    Advanced,
}

impl Config {
    /// Loads and validates a config file. Unreadable files and files that
    /// don't parse as the declarative schema above are fatal configuration
    /// errors.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Config, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| ConfigError::Invalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_raw(raw, path)
    }

    /// Applies `-r`/`-m`/`-n`/`-v`/`-q` CLI overrides on top of the
    /// file-loaded (or default) configuration. CLI flags take precedence
    /// over the matching config-file keys.
    pub fn apply_cli_overrides(
        &mut self,
        restart: Option<&str>,
        ui_mode: Option<&str>,
        default_no: bool,
        verbosity: Option<u8>,
    ) -> Result<(), ConfigError> {
        if let Some(restart) = restart {
            self.restart = parse_restart_mode(restart).map_err(|reason| ConfigError::Invalid {
                path: "<-r>".to_string(),
                reason,
            })?;
        }
        if let Some(ui_mode) = ui_mode {
            self.ui_mode = parse_ui_mode(ui_mode).map_err(|reason| ConfigError::Invalid {
                path: "<-m>".to_string(),
                reason,
            })?;
        }
        if default_no {
            self.defno = true;
        }
        if let Some(verbosity) = verbosity {
            self.verbosity = verbosity;
        }
        Ok(())
    }

    fn from_raw(raw: RawConfig, path: &Path) -> Result<Config, ConfigError> {
        let restart = parse_restart_mode(raw.restart.as_deref().unwrap_or("i")).map_err(|reason| {
            ConfigError::Invalid {
                path: path.display().to_string(),
                reason,
            }
        })?;
        let ui_mode = parse_ui_mode(raw.ui_mode.as_deref().unwrap_or("a")).map_err(|reason| {
            ConfigError::Invalid {
                path: path.display().to_string(),
                reason,
            }
        })?;
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, ConfigError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| ConfigError::Invalid {
                        path: path.display().to_string(),
                        reason: format!("bad regex {p:?}: {e}"),
                    })
                })
                .collect()
        };
        let compile_map = |map: &HashMap<String, bool>| -> Result<Vec<(Regex, bool)>, ConfigError> {
            map.iter()
                .map(|(p, v)| {
                    Regex::new(p)
                        .map(|re| (re, *v))
                        .map_err(|e| ConfigError::Invalid {
                            path: path.display().to_string(),
                            reason: format!("bad regex {p:?}: {e}"),
                        })
                })
                .collect()
        };

        Ok(Config {
            verbosity: raw.verbosity.unwrap_or(1),
            hook_d: raw.hook_d.unwrap_or_else(default_hook_d),
            notify_d: raw.notify_d.unwrap_or_else(default_notify_d),
            sendnotify: raw.sendnotify.unwrap_or_else(default_true),
            restart,
            defno: raw.defno.unwrap_or(false),
            ui_mode,
            systemctl_combine: raw.systemctl_combine.unwrap_or(false),
            blacklist: compile(&raw.blacklist)?,
            blacklist_rc: compile(&raw.blacklist_rc)?,
            override_rc: compile_map(&raw.override_rc)?,
            override_cont: compile_map(&raw.override_cont)?,
            interpscan: raw.interpscan.unwrap_or_else(default_true),
            kernelhints: raw.kernelhints.unwrap_or_default(),
        })
    }

    /// The configuration used when `-c` is omitted together with `-b`:
    /// batch mode tolerates a missing config file.
    pub fn defaults() -> Config {
        Config::from_raw(RawConfig::default(), Path::new("<defaults>"))
            .expect("default config is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::defaults();
        assert_eq!(cfg.verbosity, 1);
        assert_eq!(cfg.hook_d, PathBuf::from("/etc/needrestart/hook.d"));
        assert!(cfg.sendnotify);
        assert_eq!(cfg.restart, RestartMode::Interactive);
        assert!(!cfg.defno);
        assert_eq!(cfg.ui_mode, UiMode::Advanced);
        assert!(!cfg.systemctl_combine);
        assert!(cfg.interpscan);
        assert_eq!(cfg.kernelhints, KernelHints::Full);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::parse("bogus_key = 1\n", Path::new("test.conf")).unwrap_err();
        matches!(err, ConfigError::Invalid { .. });
    }

    #[test]
    fn parses_blacklist_regexes() {
        let cfg = Config::parse("blacklist = [\"^/opt/.*\"]\n", Path::new("test.conf")).unwrap();
        assert_eq!(cfg.blacklist.len(), 1);
        assert!(cfg.blacklist[0].is_match("/opt/foo/bin"));
    }

    #[test]
    fn kernelhints_terse() {
        let cfg = Config::parse("kernelhints = -1\n", Path::new("test.conf")).unwrap();
        assert_eq!(cfg.kernelhints, KernelHints::Terse);
    }

    #[test]
    fn restart_mode_rejects_bad_value() {
        let err = Config::parse("restart = \"x\"\n", Path::new("test.conf")).unwrap_err();
        matches!(err, ConfigError::Invalid { .. });
    }

    #[test]
    fn cli_override_takes_precedence_over_file() {
        let mut cfg = Config::parse("restart = \"i\"\n", Path::new("test.conf")).unwrap();
        cfg.apply_cli_overrides(Some("a"), Some("e"), false, None).unwrap();
        assert_eq!(cfg.restart, RestartMode::Automatic);
        assert_eq!(cfg.ui_mode, UiMode::Easy);
    }

    #[test]
    fn cli_override_rejects_bad_value() {
        let mut cfg = Config::defaults();
        assert!(cfg.apply_cli_overrides(Some("z"), None, false, None).is_err());
    }

    #[test]
    fn default_no_flag_forces_defno_true() {
        let mut cfg = Config::parse("defno = false\n", Path::new("test.conf")).unwrap();
        cfg.apply_cli_overrides(None, None, true, None).unwrap();
        assert!(cfg.defno);
    }

    #[test]
    fn verbosity_override_replaces_file_value() {
        let mut cfg = Config::parse("verbosity = 1\n", Path::new("test.conf")).unwrap();
        cfg.apply_cli_overrides(None, None, false, Some(2)).unwrap();
        assert_eq!(cfg.verbosity, 2);
    }

    #[test]
    fn no_verbosity_override_keeps_file_value() {
        let mut cfg = Config::parse("verbosity = 2\n", Path::new("test.conf")).unwrap();
        cfg.apply_cli_overrides(None, None, false, None).unwrap();
        assert_eq!(cfg.verbosity, 2);
    }
}
