//! Command-line surface, defined via `clap`'s derive macros.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

#[derive(Debug, Parser)]
#[command(name = "needrestart", version, about = "Check which services need restarting after an upgrade")]
pub struct Cli {
    /// Verbose output (stderr, `[main]`-prefixed).
    #[arg(short = 'v', action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Quiet output.
    #[arg(short = 'q', action = clap::ArgAction::SetTrue)]
    pub quiet: bool,

    /// Default answer "no" in interactive prompts.
    #[arg(short = 'n', action = clap::ArgAction::SetTrue)]
    pub default_no: bool,

    /// Configuration file path. Required and must be readable unless `-b`.
    #[arg(short = 'c')]
    pub config: Option<PathBuf>,

    /// Restart mode: l(ist-only), i(nteractive), a(utomatic).
    #[arg(short = 'r')]
    pub restart: Option<String>,

    /// Detail level: e(asy) or a(dvanced).
    #[arg(short = 'm')]
    pub ui_mode: Option<String>,

    /// Batch mode: prefix-tagged machine-readable output on stdout.
    #[arg(short = 'b', action = clap::ArgAction::SetTrue)]
    pub batch: bool,

    /// Nagios plugin mode (implies `-b`); must run as root.
    #[arg(short = 'p', action = clap::ArgAction::SetTrue)]
    pub plugin: bool,

    /// Overrides the interactive-dialog frontend.
    #[arg(short = 'f')]
    pub frontend: Option<String>,

    /// Perform the kernel check only.
    #[arg(short = 'k', action = clap::ArgAction::SetTrue)]
    pub kernel_only: bool,

    /// Perform the library/process check only.
    #[arg(short = 'l', action = clap::ArgAction::SetTrue)]
    pub library_only: bool,
}

impl Cli {
    /// `-v` and `-q` override each other; `-v` wins if both are given.
    pub fn verbosity(&self) -> Verbosity {
        if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    pub fn verbosity_level(&self) -> u8 {
        match self.verbosity() {
            Verbosity::Quiet => 0,
            Verbosity::Normal => 1,
            Verbosity::Verbose => 2,
        }
    }

    /// `Some(level)` only when `-v`/`-q` were actually given, so that
    /// leaving both unset doesn't clobber a config file's `verbosity` key
    /// with the normal-mode default.
    pub fn verbosity_override(&self) -> Option<u8> {
        if self.verbose || self.quiet {
            Some(self.verbosity_level())
        } else {
            None
        }
    }

    /// `-p` implies `-b`.
    pub fn batch_mode(&self) -> bool {
        self.batch || self.plugin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_overrides_quiet_when_both_given() {
        let cli = Cli::parse_from(["needrestart", "-v", "-q"]);
        assert_eq!(cli.verbosity(), Verbosity::Verbose);
    }

    #[test]
    fn plugin_mode_implies_batch() {
        let cli = Cli::parse_from(["needrestart", "-p"]);
        assert!(cli.batch_mode());
    }

    #[test]
    fn defaults_are_normal_and_interactive() {
        let cli = Cli::parse_from(["needrestart"]);
        assert_eq!(cli.verbosity(), Verbosity::Normal);
        assert!(!cli.batch_mode());
    }

    #[test]
    fn verbosity_override_is_none_when_neither_flag_given() {
        let cli = Cli::parse_from(["needrestart"]);
        assert_eq!(cli.verbosity_override(), None);
    }

    #[test]
    fn verbosity_override_reflects_quiet_flag() {
        let cli = Cli::parse_from(["needrestart", "-q"]);
        assert_eq!(cli.verbosity_override(), Some(0));
    }

    #[test]
    fn verbosity_override_reflects_verbose_flag() {
        let cli = Cli::parse_from(["needrestart", "-v"]);
        assert_eq!(cli.verbosity_override(), Some(2));
    }
}
