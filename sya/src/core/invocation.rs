//! Pure translation of (repository, task, action) into a borg command line.
//!
//! Nothing here touches the filesystem: include/exclude lists arrive already
//! parsed (see [`crate::io::command::CommandBuilder`]).

use std::fmt;
use std::path::PathBuf;

use crate::core::patterns::PathSets;
use crate::core::retention::RetentionRule;
use crate::model::{Repository, Task};
use crate::settings::RunSettings;

/// Environment variable borg reads the repository passphrase from.
pub const PASSPHRASE_ENV: &str = "BORG_PASSPHRASE";

/// What borg should do for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Backup,
    Prune(RetentionRule),
    Check,
    List,
}

impl Action {
    pub fn subcommand(&self) -> &'static str {
        match self {
            Action::Backup => "create",
            Action::Prune(_) => "prune",
            Action::Check => "check",
            Action::List => "list",
        }
    }

    fn supports_progress(&self) -> bool {
        matches!(self, Action::Backup | Action::Check)
    }

    fn json_output(&self) -> bool {
        matches!(self, Action::List)
    }
}

/// A fully built external command.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Added to the inherited environment.
    pub env: Vec<(String, String)>,
    pub workdir: PathBuf,
    /// stdout carries a JSON document (`--json`).
    pub json_output: bool,
}

impl Invocation {
    /// Command line for logs. The environment is left out since it holds
    /// the passphrase.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|arg| quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("workdir", &self.workdir)
            .field("json_output", &self.json_output)
            .finish()
    }
}

/// Build the invocation for `action` against `repo`.
///
/// `paths` is only read for [`Action::Backup`]; `task` supplies the archive
/// prefix for backup, prune and list.
pub fn build_invocation(
    settings: &RunSettings,
    repo: &Repository,
    task: Option<&Task>,
    action: &Action,
    paths: &PathSets,
) -> Invocation {
    let mut args = vec![action.subcommand().to_string(), "--log-json".to_string()];
    if settings.progress && action.supports_progress() {
        args.push("--progress".to_string());
    }
    if let Some(flag) = settings.verbosity.borg_flag() {
        args.push(flag.to_string());
    }
    if action.json_output() {
        args.push("--json".to_string());
    }
    if let Some(remote_path) = &repo.remote_path {
        args.push("--remote-path".to_string());
        args.push(remote_path.clone());
    }

    match action {
        Action::Backup => {
            if let Some(compression) = &repo.compression {
                args.push("--compression".to_string());
                args.push(compression.clone());
            }
            args.push("--stats".to_string());
            for exclude in &paths.excludes {
                args.push("--exclude".to_string());
                args.push(exclude.clone());
            }
            let archive = task
                .map(Task::archive_name)
                .unwrap_or_else(|| format!("{}-{{now}}", crate::model::DEFAULT_PREFIX));
            args.push(format!("{}::{}", repo.path, archive));
            args.extend(paths.includes.iter().cloned());
        }
        Action::Prune(rule) => {
            args.push("--list".to_string());
            args.push("--stats".to_string());
            if let Some(within) = &rule.within {
                args.push("--keep-within".to_string());
                args.push(within.clone());
            }
            for (unit, count) in &rule.keep {
                args.push(unit.flag());
                args.push(count.to_string());
            }
            push_prefix(&mut args, task);
            args.push(repo.path.clone());
        }
        Action::Check => {
            args.push(repo.path.clone());
        }
        Action::List => {
            push_prefix(&mut args, task);
            args.push(repo.path.clone());
        }
    }

    let mut env = Vec::new();
    if let Some(passphrase) = &repo.passphrase {
        env.push((PASSPHRASE_ENV.to_string(), passphrase.clone()));
    }

    Invocation {
        program: settings.borg.clone(),
        args,
        env,
        workdir: settings.workdir.clone(),
        json_output: action.json_output(),
    }
}

fn push_prefix(args: &mut Vec<String>, task: Option<&Task>) {
    if let Some(task) = task {
        args.push("--prefix".to_string());
        args.push(task.archive_prefix());
    }
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,{}".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
