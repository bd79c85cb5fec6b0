//! Test-only builders and scripted runners.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::invocation::Invocation;
use crate::core::messages::BorgMessage;
use crate::error::ProcessError;
use crate::io::hooks::{HookOutcome, HookRunner};
use crate::io::process::{CancelToken, ExitKind, ExternalCommandResult};
use crate::io::runner::CommandRunner;
use crate::model::{Config, DEFAULT_PREFIX, GlobalOptions, Hook, Repository, Task};
use crate::settings::{DEFAULT_BORG, RunSettings, Verbosity};

/// Temporary configuration directory holding a `config.yaml`.
pub struct ConfDir {
    dir: tempfile::TempDir,
}

impl ConfDir {
    pub fn new(config_yaml: &str) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("config.yaml"), config_yaml)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file next to `config.yaml` and return its path.
    pub fn write(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write an executable shell script.
    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) -> io::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.write(name, &format!("#!/bin/sh\n{body}\n"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }
}

static NEXT_CONFDIR: AtomicUsize = AtomicUsize::new(0);

/// Config with a confdir no other test shares, so repository locks never
/// collide between tests running in parallel.
pub fn config_with(repositories: Vec<Repository>, tasks: Vec<Task>) -> Config {
    let n = NEXT_CONFDIR.fetch_add(1, Ordering::Relaxed);
    Config {
        confdir: std::env::temp_dir().join(format!("sya-test-{}-{n}", std::process::id())),
        options: GlobalOptions::default(),
        repositories,
        tasks,
    }
}

/// Local repository without passphrase or hooks.
pub fn repository(name: &str, path: &str) -> Repository {
    Repository {
        name: name.to_string(),
        path: path.to_string(),
        passphrase: None,
        compression: None,
        remote_path: None,
        mount: Vec::new(),
        umount: Vec::new(),
    }
}

/// Enabled task backing up `/etc`, no hooks and no retention.
pub fn task(name: &str, repository: &str) -> Task {
    Task {
        name: name.to_string(),
        enabled: true,
        repository: repository.to_string(),
        pre: Vec::new(),
        post: Vec::new(),
        includes: vec!["/etc".to_string()],
        include_file: None,
        exclude_file: None,
        path_prefix: None,
        prefix: DEFAULT_PREFIX.to_string(),
        keep: None,
    }
}

pub fn settings() -> RunSettings {
    RunSettings {
        borg: PathBuf::from(DEFAULT_BORG),
        workdir: std::env::temp_dir(),
        verbosity: Verbosity::Warning,
        progress: false,
        dry_run: false,
        hook_timeout: None,
    }
}

/// Response of [`ScriptedRunner`] to one invocation.
#[derive(Debug, Clone)]
pub enum ScriptedCall {
    Exit(ExitKind),
    /// Successful run printing this on stdout.
    Stdout(String),
    /// Emit these records, then exit with the given status.
    Records(Vec<BorgMessage>, ExitKind),
    NotFound,
    /// Cancel the runner's token, as Ctrl-C would, and report the command
    /// as interrupted.
    Interrupt,
}

/// Returns scripted results in order; once the script runs out every call
/// succeeds.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: RefCell<VecDeque<ScriptedCall>>,
    calls: RefCell<Vec<Invocation>>,
    cancel: CancelToken,
}

impl ScriptedRunner {
    pub fn new(script: Vec<ScriptedCall>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            ..Self::default()
        }
    }

    /// Share `cancel` with the orchestrator so `Interrupt` reaches it.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// First argument of each call, e.g. `create` or `prune`.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| call.args.first().cloned())
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &Invocation,
        on_record: &mut dyn FnMut(&BorgMessage),
    ) -> Result<ExternalCommandResult, ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        let next = self.script.borrow_mut().pop_front();
        match next {
            None => Ok(ExternalCommandResult::success()),
            Some(ScriptedCall::Exit(status)) => Ok(ExternalCommandResult::with_status(status)),
            Some(ScriptedCall::Stdout(stdout)) => {
                let mut result = ExternalCommandResult::success();
                result.stdout = stdout.into_bytes();
                Ok(result)
            }
            Some(ScriptedCall::Records(records, status)) => {
                for record in &records {
                    on_record(record);
                }
                let mut result = ExternalCommandResult::with_status(status);
                result.records = records;
                Ok(result)
            }
            Some(ScriptedCall::NotFound) => Err(ProcessError::NotFound {
                program: invocation.program.clone(),
            }),
            Some(ScriptedCall::Interrupt) => {
                self.cancel.cancel();
                Err(ProcessError::Cancelled)
            }
        }
    }
}

/// Hook runner that fails the listed commands and records every call.
#[derive(Debug, Default)]
pub struct ScriptedHookRunner {
    failing: Vec<String>,
    calls: RefCell<Vec<(String, Vec<String>)>>,
}

impl ScriptedHookRunner {
    pub fn failing(commands: &[&str]) -> Self {
        Self {
            failing: commands.iter().map(|cmd| cmd.to_string()).collect(),
            ..Self::default()
        }
    }

    /// `(command, args)` of every hook run, in order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.borrow().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(cmd, _)| cmd.clone()).collect()
    }
}

impl HookRunner for ScriptedHookRunner {
    fn run(&self, hook: &Hook, args: &[&str]) -> Result<HookOutcome, ProcessError> {
        self.calls.borrow_mut().push((
            hook.command.clone(),
            args.iter().map(|arg| arg.to_string()).collect(),
        ));
        if self.failing.contains(&hook.command) {
            Ok(HookOutcome::Failed("exited with code 1".to_string()))
        } else {
            Ok(HookOutcome::Passed)
        }
    }
}
