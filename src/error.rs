//! Error taxonomy. One enum per component, all implementing [`std::error::Error`]
//! + [`std::fmt::Display`] by hand rather than pulling in a derive-macro
//! error crate.

use std::fmt;

#[derive(Debug)]
pub enum ProcTableError {
    Io { pid: i32, source: std::io::Error },
    Parse { pid: i32, reason: String },
}

impl fmt::Display for ProcTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcTableError::Io { pid, source } => {
                write!(f, "failed to read /proc/{pid}: {source}")
            }
            ProcTableError::Parse { pid, reason } => {
                write!(f, "failed to parse /proc/{pid}/stat: {reason}")
            }
        }
    }
}

impl std::error::Error for ProcTableError {}

#[derive(Debug)]
pub enum MappingError {
    Io { pid: i32, source: std::io::Error },
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::Io { pid, source } => {
                write!(f, "failed to read /proc/{pid}/maps: {source}")
            }
        }
    }
}

impl std::error::Error for MappingError {}

#[derive(Debug)]
pub enum ResolverError {
    HookSpawn { hook: String, reason: String },
    HookIo { hook: String, source: std::io::Error },
    /// Fatal per spec.md §7 ("unknown hook directory"): distinct from a
    /// single hook's failure, which is logged and skipped.
    HookDirUnreadable { path: String, source: std::io::Error },
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverError::HookSpawn { hook, reason } => {
                write!(f, "hook {hook} failed to start: {reason}")
            }
            ResolverError::HookIo { hook, source } => {
                write!(f, "hook {hook} I/O error: {source}")
            }
            ResolverError::HookDirUnreadable { path, source } => {
                write!(f, "cannot read hook directory {path}: {source}")
            }
        }
    }
}

impl std::error::Error for ResolverError {}

#[derive(Debug)]
pub enum ConfigError {
    Unreadable { path: String, source: std::io::Error },
    Invalid { path: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Unreadable { path, source } => {
                write!(f, "cannot read config file {path}: {source}")
            }
            ConfigError::Invalid { path, reason } => {
                write!(f, "invalid config file {path}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level error type for fatal initialization failures only. The driver
/// never aborts on per-process errors; only initialization errors (config,
/// hook directory, UI class) are fatal.
#[derive(Debug)]
pub enum NeedrestartError {
    Config(ConfigError),
    Resolver(ResolverError),
    UsageError(String),
}

impl fmt::Display for NeedrestartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeedrestartError::Config(e) => write!(f, "{e}"),
            NeedrestartError::Resolver(e) => write!(f, "{e}"),
            NeedrestartError::UsageError(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for NeedrestartError {}

impl From<ConfigError> for NeedrestartError {
    fn from(e: ConfigError) -> Self {
        NeedrestartError::Config(e)
    }
}

impl From<ResolverError> for NeedrestartError {
    fn from(e: ResolverError) -> Self {
        NeedrestartError::Resolver(e)
    }
}
