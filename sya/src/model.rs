//! Validated configuration model.
//!
//! Built once by [`crate::io::config::load_config`] and never mutated during a
//! run. Repositories and tasks keep configuration order; names are unique.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::retention::RetentionPolicy;
use crate::error::ConfigError;

/// Default archive name prefix; borg expands the placeholder itself.
pub const DEFAULT_PREFIX: &str = "{hostname}";

/// The whole configuration directory, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding `config.yaml`; relative list, key and script paths
    /// resolve against it.
    pub confdir: PathBuf,
    pub options: GlobalOptions,
    pub repositories: Vec<Repository>,
    pub tasks: Vec<Task>,
}

impl Config {
    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|repo| repo.name == name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Resolve a task's repository reference.
    pub fn repository_for(&self, task: &Task) -> Result<&Repository, ConfigError> {
        self.repository(&task.repository)
            .ok_or_else(|| ConfigError::UnknownRepository {
                task: task.name.clone(),
                repository: task.repository.clone(),
            })
    }

    /// Select tasks by name, or all tasks in configuration order when `names`
    /// is empty.
    pub fn select_tasks(&self, names: &[String]) -> Result<Vec<&Task>, ConfigError> {
        if names.is_empty() {
            return Ok(self.tasks.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.task(name)
                    .ok_or_else(|| ConfigError::UnknownTask(name.clone()))
            })
            .collect()
    }

    /// Select repositories by name, or all of them when `names` is empty.
    pub fn select_repositories(
        &self,
        names: &[String],
    ) -> Result<Vec<&Repository>, ConfigError> {
        if names.is_empty() {
            return Ok(self.repositories.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.repository(name)
                    .ok_or_else(|| ConfigError::UnknownRepositoryName(name.clone()))
            })
            .collect()
    }

    /// Distinct repositories used by the enabled tasks among `tasks`, in
    /// first-use order.
    pub fn repositories_of<'a>(
        &'a self,
        tasks: &[&'a Task],
    ) -> Result<Vec<&'a Repository>, ConfigError> {
        let mut repos: Vec<&Repository> = Vec::new();
        for task in tasks.iter().filter(|task| task.enabled) {
            let repo = self.repository_for(task)?;
            if !repos.iter().any(|seen| seen.name == repo.name) {
                repos.push(repo);
            }
        }
        Ok(repos)
    }
}

/// The `sya:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    /// Log at info level and run borg with `--verbose`.
    pub verbose: bool,
    /// borg executable; `None` means `borg` from `PATH`.
    pub borg: Option<PathBuf>,
    /// Kill hooks that run longer than this.
    pub hook_timeout: Option<Duration>,
}

/// A borg repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    /// Local path, `host:path` or `ssh://` URL.
    pub path: String,
    /// Passphrase, already read from `passphrase-file` when one was given.
    pub passphrase: Option<String>,
    pub compression: Option<String>,
    /// borg executable on the remote host (`--remote-path`).
    pub remote_path: Option<String>,
    /// Hooks run before any use of the repository (e.g. mounting a disk).
    pub mount: Vec<Hook>,
    /// Hooks run after use, whenever `mount` succeeded.
    pub umount: Vec<Hook>,
}

/// A backup task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    /// `run-this`; disabled tasks never invoke anything.
    pub enabled: bool,
    /// Name of the repository the archives go to.
    pub repository: String,
    pub pre: Vec<Hook>,
    pub post: Vec<Hook>,
    pub includes: Vec<String>,
    /// Combined include/exclude list, absolute after loading.
    pub include_file: Option<PathBuf>,
    pub exclude_file: Option<PathBuf>,
    /// Absolute directory all paths are re-rooted under.
    pub path_prefix: Option<String>,
    /// Archive name prefix; archives are named `<prefix>-<timestamp>`.
    pub prefix: String,
    pub keep: Option<RetentionPolicy>,
}

impl Task {
    /// Prefix selecting this task's archives for prune and list.
    pub fn archive_prefix(&self) -> String {
        format!("{}-", self.prefix)
    }

    /// Archive name template for `borg create`.
    pub fn archive_name(&self) -> String {
        format!("{}-{{now:%Y-%m-%d_%H:%M:%S}}", self.prefix)
    }
}

/// A shell command run before or after work on a task or repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub command: String,
}

impl Hook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Resolve `path` against the configuration directory unless absolute.
pub fn resolve_in(confdir: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        confdir.join(path)
    }
}
