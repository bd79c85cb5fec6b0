//! Run-wide settings, built once from the CLI and the `sya:` section.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::Config;

/// borg executable used when the configuration does not name one.
pub const DEFAULT_BORG: &str = "borg";

/// Log level requested from borg, mapped onto its common options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Critical,
    Error,
    #[default]
    Warning,
    Info,
    Debug,
}

impl Verbosity {
    /// Map `-v` occurrences (plus the config's `verbose`) and `-q`
    /// occurrences to a level. Each `-q` cancels one `-v`.
    pub fn from_flags(verbose: u8, quiet: u8) -> Self {
        match i16::from(verbose) - i16::from(quiet) {
            ..=-2 => Verbosity::Critical,
            -1 => Verbosity::Error,
            0 => Verbosity::Warning,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }

    /// borg flag for this level; warning is borg's default and has none.
    pub fn borg_flag(self) -> Option<&'static str> {
        match self {
            Verbosity::Critical => Some("--critical"),
            Verbosity::Error => Some("--error"),
            Verbosity::Warning => None,
            Verbosity::Info => Some("--verbose"),
            Verbosity::Debug => Some("--debug"),
        }
    }

    /// `tracing` filter directive for our own logs.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Critical | Verbosity::Error => "error",
            Verbosity::Warning => "warn",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Explicit configuration handed to the builder, runners and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub borg: PathBuf,
    /// Working directory for borg and hooks (the config directory).
    pub workdir: PathBuf,
    pub verbosity: Verbosity,
    /// Pass `--progress` to commands that support it.
    pub progress: bool,
    /// Log what would run instead of running it.
    pub dry_run: bool,
    pub hook_timeout: Option<Duration>,
}

impl RunSettings {
    /// Combine the loaded configuration with command-line flags.
    ///
    /// `verbose_flags` and `quiet_flags` count `-v` and `-q`; the config's
    /// `verbose: true` counts as one `-v`.
    pub fn from_config(
        config: &Config,
        verbose_flags: u8,
        quiet_flags: u8,
        dry_run: bool,
    ) -> Self {
        let count = verbose_flags.max(u8::from(config.options.verbose));
        Self {
            borg: config
                .options
                .borg
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BORG)),
            workdir: config.confdir.clone(),
            verbosity: Verbosity::from_flags(count, quiet_flags),
            progress: false,
            dry_run,
            hook_timeout: config.options.hook_timeout,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}
