//! Typed errors the orchestrator has to tell apart.
//!
//! Everything else travels as `anyhow::Error`. These enums carry the
//! run-level policy: a [`ConfigError`] aborts the run before any task starts,
//! a [`ProcessError`] only fails the invocation that raised it and a
//! [`LockError`] only fails the task that needed the repository.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems detected while loading or planning.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{0}")]
    Invalid(String),

    #[error("task '{task}': no such repository '{repository}'")]
    UnknownRepository { task: String, repository: String },

    #[error("no such task: {0}")]
    UnknownTask(String),

    #[error("no such repository: {0}")]
    UnknownRepositoryName(String),

    #[error("task '{task}': either 'includes' or 'include-file' is mandatory")]
    MissingIncludes { task: String },

    #[error("task '{task}': invalid retention rule: {reason}")]
    InvalidRetention { task: String, reason: String },

    #[error("task '{task}': cannot read list file {}: {source}", path.display())]
    ListFile {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("task '{task}': path '{path}' must be absolute")]
    RelativePath { task: String, path: String },

    #[error("repository '{repository}': cannot read passphrase file {}: {source}", path.display())]
    PassphraseFile {
        repository: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures to run an external command at all.
///
/// A command that runs and exits non-zero is not a `ProcessError`; that is
/// reported through [`crate::io::process::ExitKind`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("executable not found: {}", program.display())]
    NotFound { program: PathBuf },

    #[error("spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("interrupted")]
    Cancelled,
}

impl ProcessError {
    pub fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn spawn(program: impl Into<PathBuf>, source: io::Error) -> Self {
        let program = program.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound { program }
        } else {
            Self::Spawn { program, source }
        }
    }
}

/// Failure to take the host-wide repository lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("repository '{repository}' is in use by another sya process")]
    InUse { repository: String },

    #[error("lock repository '{repository}': {source}")]
    Io {
        repository: String,
        #[source]
        source: io::Error,
    },
}
