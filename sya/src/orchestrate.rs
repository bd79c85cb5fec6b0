//! Task orchestration for `sya create`, `prune`, `check` and `list`.
//!
//! Every entry point plans first: all invocations of the selected tasks are
//! built before anything runs, so a broken list file aborts the run with a
//! [`ConfigError`] instead of failing halfway through.
//!
//! Per task the order is fixed:
//!
//! 1. lock the repository and run its `mount` hooks,
//! 2. `pre` hooks (the first failure fails the task and skips 3-5),
//! 3. `borg create` (a failure skips 4 but not 5),
//! 4. one `borg prune` per retention pass (failures make the task partial),
//! 5. `post` hooks with `$1` set to `0` or `1`,
//! 6. `umount` hooks, whenever mounting succeeded.
//!
//! Tasks are isolated from each other. After an interrupt the current task
//! fails and the remaining ones are reported as cancelled.

use tracing::{debug, info, instrument, warn};

use crate::core::invocation::Invocation;
use crate::core::messages::{ArchiveList, BorgMessage};
use crate::core::outcome::{RunOutcome, Step, StepResult, StepStatus, TaskOutcome, TaskStatus};
use crate::core::retention::RetentionRule;
use crate::error::{ConfigError, ProcessError};
use crate::io::command::CommandBuilder;
use crate::io::hooks::{HookOutcome, HookRunner};
use crate::io::lock::RepositoryLock;
use crate::io::process::{CancelToken, ExitKind, ExternalCommandResult, log_record};
use crate::io::runner::CommandRunner;
use crate::model::{Config, Hook, Repository, Task};
use crate::settings::RunSettings;

/// Progress notifications for observers such as a UI.
#[derive(Debug)]
pub enum RunEvent<'a> {
    TaskStarted { task: &'a str },
    TaskDisabled { task: &'a str },
    StepStarted { task: &'a str, step: &'a Step },
    StepFinished { task: &'a str, result: &'a StepResult },
    Record { task: &'a str, record: &'a BorgMessage },
    ArchiveListed { task: &'a str, archive: &'a str },
    TaskFinished { outcome: &'a TaskOutcome },
}

/// What a planned task will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Hooks, backup, prune passes.
    Create,
    /// Prune passes only, no pre/post hooks.
    Prune,
}

/// Invocations for one task, built before the run starts.
#[derive(Debug)]
pub struct TaskPlan<'a> {
    pub task: &'a Task,
    pub repository: &'a Repository,
    pub backup: Option<Invocation>,
    pub prunes: Vec<(RetentionRule, Invocation)>,
}

/// Drives tasks through the runners.
pub struct Orchestrator<'a, R, H> {
    config: &'a Config,
    settings: &'a RunSettings,
    runner: &'a R,
    hooks: &'a H,
    cancel: CancelToken,
}

/// Per-task bookkeeping while steps run.
struct Recorder<'e, F> {
    outcome: TaskOutcome,
    on_event: &'e mut F,
    interrupted: bool,
}

impl<F: FnMut(&RunEvent<'_>)> Recorder<'_, F> {
    fn started(&mut self, step: &Step) {
        info!(task = %self.outcome.name, "{step}");
        (self.on_event)(&RunEvent::StepStarted {
            task: &self.outcome.name,
            step,
        });
    }

    fn finished(&mut self, result: StepResult) {
        match &result.status {
            StepStatus::Failed(reason) => {
                warn!(task = %self.outcome.name, "{} failed: {reason}", result.step);
            }
            StepStatus::Warning => {
                warn!(task = %self.outcome.name, "{} finished with warnings", result.step);
            }
            StepStatus::Succeeded => {
                debug!(task = %self.outcome.name, "{} done", result.step);
            }
        }
        (self.on_event)(&RunEvent::StepFinished {
            task: &self.outcome.name,
            result: &result,
        });
        self.outcome.steps.push(result);
    }

    fn finish(mut self, status: TaskStatus) -> (TaskOutcome, bool) {
        self.outcome.status = status;
        info!(task = %self.outcome.name, status = %status, "task finished");
        (self.on_event)(&RunEvent::TaskFinished {
            outcome: &self.outcome,
        });
        (self.outcome, self.interrupted)
    }
}

impl<'a, R: CommandRunner, H: HookRunner> Orchestrator<'a, R, H> {
    pub fn new(
        config: &'a Config,
        settings: &'a RunSettings,
        runner: &'a R,
        hooks: &'a H,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            settings,
            runner,
            hooks,
            cancel,
        }
    }

    /// Build every invocation for the selected tasks.
    ///
    /// Disabled tasks are planned empty without reading their list files.
    pub fn plan(&self, names: &[String], mode: Mode) -> Result<Vec<TaskPlan<'a>>, ConfigError> {
        let builder = CommandBuilder::new(self.settings);
        self.config
            .select_tasks(names)?
            .into_iter()
            .map(|task| -> Result<TaskPlan<'a>, ConfigError> {
                let repository = self.config.repository_for(task)?;
                if !task.enabled {
                    return Ok(TaskPlan {
                        task,
                        repository,
                        backup: None,
                        prunes: Vec::new(),
                    });
                }
                let backup = match mode {
                    Mode::Create => Some(builder.backup(repository, task)?),
                    Mode::Prune => None,
                };
                Ok(TaskPlan {
                    task,
                    repository,
                    backup,
                    prunes: builder.prunes(repository, task),
                })
            })
            .collect()
    }

    /// `sya create`: back up and prune the selected tasks.
    #[instrument(skip_all, fields(tasks = names.len()))]
    pub fn run_create<F: FnMut(&RunEvent<'_>)>(
        &self,
        names: &[String],
        mut on_event: F,
    ) -> Result<RunOutcome, ConfigError> {
        let plans = self.plan(names, Mode::Create)?;
        Ok(self.execute(&plans, Mode::Create, &mut on_event))
    }

    /// `sya prune`: apply retention policies without backing up.
    #[instrument(skip_all, fields(tasks = names.len()))]
    pub fn run_prune<F: FnMut(&RunEvent<'_>)>(
        &self,
        names: &[String],
        mut on_event: F,
    ) -> Result<RunOutcome, ConfigError> {
        let plans = self.plan(names, Mode::Prune)?;
        Ok(self.execute(&plans, Mode::Prune, &mut on_event))
    }

    /// `sya check`: verify each distinct repository once.
    ///
    /// `items` are task names, or repository names when `by_repository`.
    #[instrument(skip_all, fields(items = items.len(), by_repository = by_repository))]
    pub fn run_check<F: FnMut(&RunEvent<'_>)>(
        &self,
        items: &[String],
        by_repository: bool,
        mut on_event: F,
    ) -> Result<RunOutcome, ConfigError> {
        let repositories = if by_repository {
            self.config.select_repositories(items)?
        } else {
            let tasks = self.config.select_tasks(items)?;
            self.config.repositories_of(&tasks)?
        };
        let builder = CommandBuilder::new(self.settings);

        let mut run = RunOutcome::default();
        for repo in repositories {
            if run.interrupted || self.cancel.is_cancelled() {
                run.interrupted = true;
                run.tasks
                    .push(TaskOutcome::new(repo.name.as_str(), TaskStatus::Cancelled));
                continue;
            }
            let mut rec = self.recorder(&repo.name, &mut on_event);
            let status = match self.open_repository(&mut rec, repo) {
                None => TaskStatus::Failed,
                Some(lock) => {
                    let checked = self
                        .borg_step(&mut rec, Step::Check, &builder.check(repo))
                        .is_some();
                    let closed = self.close_repository(&mut rec, repo, checked);
                    drop(lock);
                    derive_status(&rec, !checked, !closed)
                }
            };
            let (outcome, interrupted) = rec.finish(status);
            run.interrupted |= interrupted;
            run.tasks.push(outcome);
        }
        Ok(run)
    }

    /// `sya list`: report the archives each selected task has created.
    #[instrument(skip_all, fields(tasks = names.len()))]
    pub fn run_list<F: FnMut(&RunEvent<'_>)>(
        &self,
        names: &[String],
        mut on_event: F,
    ) -> Result<RunOutcome, ConfigError> {
        let tasks = self.config.select_tasks(names)?;
        let mut plans = Vec::with_capacity(tasks.len());
        for task in tasks {
            plans.push((task, self.config.repository_for(task)?));
        }
        let builder = CommandBuilder::new(self.settings);

        let mut run = RunOutcome::default();
        for (task, repo) in plans {
            if let Some(outcome) = self.skip(task, &mut run, &mut on_event) {
                run.tasks.push(outcome);
                continue;
            }
            let mut rec = self.recorder(&task.name, &mut on_event);
            let status = match self.open_repository(&mut rec, repo) {
                None => TaskStatus::Failed,
                Some(lock) => {
                    let listed = self.list_archives(&mut rec, &builder.list(repo, task));
                    let closed = self.close_repository(&mut rec, repo, listed);
                    drop(lock);
                    derive_status(&rec, !listed, !closed)
                }
            };
            let (outcome, interrupted) = rec.finish(status);
            run.interrupted |= interrupted;
            run.tasks.push(outcome);
        }
        Ok(run)
    }

    fn execute<F: FnMut(&RunEvent<'_>)>(
        &self,
        plans: &[TaskPlan<'_>],
        mode: Mode,
        on_event: &mut F,
    ) -> RunOutcome {
        let mut run = RunOutcome::default();
        for plan in plans {
            if let Some(outcome) = self.skip(plan.task, &mut run, on_event) {
                run.tasks.push(outcome);
                continue;
            }
            let (outcome, interrupted) = self.run_task(plan, mode, on_event);
            run.interrupted |= interrupted;
            run.tasks.push(outcome);
        }
        run
    }

    /// Outcome for a task that must not start: disabled, or the run was
    /// interrupted.
    fn skip<F: FnMut(&RunEvent<'_>)>(
        &self,
        task: &Task,
        run: &mut RunOutcome,
        on_event: &mut F,
    ) -> Option<TaskOutcome> {
        if !task.enabled {
            debug!(task = %task.name, "task disabled, set 'run-this: yes' to run it");
            on_event(&RunEvent::TaskDisabled { task: &task.name });
            return Some(TaskOutcome::new(task.name.as_str(), TaskStatus::Disabled));
        }
        if run.interrupted || self.cancel.is_cancelled() {
            run.interrupted = true;
            return Some(TaskOutcome::new(task.name.as_str(), TaskStatus::Cancelled));
        }
        None
    }

    fn recorder<'e, F: FnMut(&RunEvent<'_>)>(
        &self,
        name: &str,
        on_event: &'e mut F,
    ) -> Recorder<'e, F> {
        info!(task = %name, "starting");
        on_event(&RunEvent::TaskStarted { task: name });
        Recorder {
            outcome: TaskOutcome::new(name, TaskStatus::Success),
            on_event,
            interrupted: false,
        }
    }

    #[instrument(skip_all, fields(task = %plan.task.name))]
    fn run_task<F: FnMut(&RunEvent<'_>)>(
        &self,
        plan: &TaskPlan<'_>,
        mode: Mode,
        on_event: &mut F,
    ) -> (TaskOutcome, bool) {
        let task = plan.task;
        let mut rec = self.recorder(&task.name, on_event);
        let Some(lock) = self.open_repository(&mut rec, plan.repository) else {
            return rec.finish(TaskStatus::Failed);
        };

        let mut failed = false;
        let mut degraded = false;
        // Status handed to post and umount hooks as `$1`.
        let mut work_ok = false;
        let run_hooks = mode == Mode::Create;
        let pre_ok = !run_hooks
            || task.pre.iter().all(|hook| {
                let step = Step::PreHook(hook.command.clone());
                self.hook_step(&mut rec, step, hook, &[])
            });

        if !pre_ok {
            failed = true;
        } else {
            let backup_ok = match &plan.backup {
                Some(invocation) => self.borg_step(&mut rec, Step::Backup, invocation).is_some(),
                None => true,
            };
            if !backup_ok {
                failed = true;
            } else {
                if plan.prunes.is_empty() && mode == Mode::Prune {
                    info!(task = %task.name, "no retention policy, nothing to prune");
                }
                for (index, (rule, invocation)) in plan.prunes.iter().enumerate() {
                    if rec.interrupted {
                        break;
                    }
                    let step = Step::Prune(index, rule.clone());
                    if self.borg_step(&mut rec, step, invocation).is_none() {
                        degraded = true;
                    }
                }
            }

            work_ok = !(failed || degraded);
            if run_hooks {
                let status = if work_ok { "0" } else { "1" };
                for hook in &task.post {
                    if rec.interrupted {
                        break;
                    }
                    let step = Step::PostHook(hook.command.clone());
                    if !self.hook_step(&mut rec, step, hook, &[status]) {
                        degraded = true;
                    }
                }
            }
        }

        if !self.close_repository(&mut rec, plan.repository, work_ok) {
            degraded = true;
        }
        drop(lock);
        let status = derive_status(&rec, failed, degraded);
        rec.finish(status)
    }

    /// Lock the repository and run its mount hooks.
    ///
    /// `None` means the task cannot use the repository; nothing else should
    /// run for it.
    fn open_repository<F: FnMut(&RunEvent<'_>)>(
        &self,
        rec: &mut Recorder<'_, F>,
        repo: &Repository,
    ) -> Option<RepositoryLock> {
        let lock = match RepositoryLock::acquire(&self.config.confdir, repo) {
            Ok(lock) => lock,
            Err(err) => {
                rec.finished(StepResult::failed(Step::Lock, err.to_string()));
                return None;
            }
        };
        for hook in &repo.mount {
            if !self.hook_step(rec, Step::Mount(hook.command.clone()), hook, &[]) {
                return None;
            }
        }
        Some(lock)
    }

    /// Run the umount hooks; true when all of them passed.
    fn close_repository<F: FnMut(&RunEvent<'_>)>(
        &self,
        rec: &mut Recorder<'_, F>,
        repo: &Repository,
        succeeded: bool,
    ) -> bool {
        let status = if succeeded { "0" } else { "1" };
        let mut all_passed = true;
        for hook in &repo.umount {
            if rec.interrupted {
                break;
            }
            all_passed &= self.hook_step(rec, Step::Umount(hook.command.clone()), hook, &[status]);
        }
        all_passed
    }

    /// Run one hook and record it; true when it passed.
    fn hook_step<F: FnMut(&RunEvent<'_>)>(
        &self,
        rec: &mut Recorder<'_, F>,
        step: Step,
        hook: &Hook,
        args: &[&str],
    ) -> bool {
        rec.started(&step);
        match self.hooks.run(hook, args) {
            Ok(HookOutcome::Passed) => {
                rec.finished(StepResult::new(step, StepStatus::Succeeded));
                true
            }
            Ok(HookOutcome::Failed(reason)) => {
                rec.finished(StepResult::failed(step, reason));
                false
            }
            Err(err) => {
                rec.interrupted |= matches!(err, ProcessError::Cancelled);
                rec.finished(StepResult::failed(step, err.to_string()));
                false
            }
        }
    }

    /// Run one borg invocation and record it; the result when it completed.
    fn borg_step<F: FnMut(&RunEvent<'_>)>(
        &self,
        rec: &mut Recorder<'_, F>,
        step: Step,
        invocation: &Invocation,
    ) -> Option<ExternalCommandResult> {
        rec.started(&step);
        match self.call_borg(rec, invocation) {
            Ok((result, status)) => {
                rec.finished(StepResult::new(step, status));
                Some(result)
            }
            Err(reason) => {
                rec.finished(StepResult::failed(step, reason));
                None
            }
        }
    }

    /// Run borg for a started step, streaming its records. `Err` carries the
    /// failure reason.
    fn call_borg<F: FnMut(&RunEvent<'_>)>(
        &self,
        rec: &mut Recorder<'_, F>,
        invocation: &Invocation,
    ) -> Result<(ExternalCommandResult, StepStatus), String> {
        let task = rec.outcome.name.as_str();
        let on_event = &mut *rec.on_event;
        let result = self.runner.run(invocation, &mut |record: &BorgMessage| {
            log_record(record);
            on_event(&RunEvent::Record { task, record });
        });
        match result {
            Ok(result) => match result.failure_reason() {
                None => {
                    let status = if result.status == ExitKind::Warning {
                        StepStatus::Warning
                    } else {
                        StepStatus::Succeeded
                    };
                    Ok((result, status))
                }
                Some(reason) => Err(reason),
            },
            Err(err) => {
                rec.interrupted |= matches!(err, ProcessError::Cancelled);
                Err(err.to_string())
            }
        }
    }

    /// Run `borg list --json` and report each archive; true on success.
    ///
    /// Unparseable output fails the step before it is reported as finished.
    fn list_archives<F: FnMut(&RunEvent<'_>)>(
        &self,
        rec: &mut Recorder<'_, F>,
        invocation: &Invocation,
    ) -> bool {
        rec.started(&Step::List);
        let listed = self
            .call_borg(rec, invocation)
            .and_then(|(result, status)| Ok((status, parse_archives(invocation, &result)?)));
        match listed {
            Ok((status, archives)) => {
                rec.finished(StepResult::new(Step::List, status));
                for archive in &archives {
                    (rec.on_event)(&RunEvent::ArchiveListed {
                        task: &rec.outcome.name,
                        archive: archive.as_str(),
                    });
                }
                true
            }
            Err(reason) => {
                rec.finished(StepResult::failed(Step::List, reason));
                false
            }
        }
    }
}

/// Archive names from `borg list --json` stdout. Blank output, or an
/// invocation without `--json`, lists nothing.
fn parse_archives(
    invocation: &Invocation,
    result: &ExternalCommandResult,
) -> Result<Vec<String>, String> {
    if !invocation.json_output || result.stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice::<ArchiveList>(&result.stdout)
        .map(|list| list.archives.into_iter().map(|archive| archive.name).collect())
        .map_err(|err| format!("unexpected list output: {err}"))
}

fn derive_status<F>(rec: &Recorder<'_, F>, failed: bool, degraded: bool) -> TaskStatus {
    if rec.interrupted || failed {
        TaskStatus::Failed
    } else if degraded {
        TaskStatus::Partial
    } else {
        TaskStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retention::{RetentionPolicy, RetentionUnit};
    use crate::test_support::{
        ScriptedCall, ScriptedHookRunner, ScriptedRunner, config_with, repository, settings,
        task,
    };

    fn daily(n: u32) -> RetentionRule {
        RetentionRule {
            within: None,
            keep: [(RetentionUnit::Daily, n)].into_iter().collect(),
        }
    }

    #[test]
    fn plan_reports_missing_list_files_before_running() {
        let mut broken = task("broken", "r");
        broken.include_file = Some("/nonexistent/sya/broken.lst".into());
        let config = config_with(
            vec![repository("r", "/srv/borg")],
            vec![task("first", "r"), broken],
        );
        let settings = settings();
        let runner = ScriptedRunner::new(Vec::new());
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let err = orchestrator.run_create(&[], |_| {}).unwrap_err();
        assert!(matches!(err, ConfigError::ListFile { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn disabled_task_list_files_are_not_read() {
        let mut disabled = task("off", "r");
        disabled.enabled = false;
        disabled.include_file = Some("/nonexistent/sya/off.lst".into());
        let config = config_with(vec![repository("r", "/srv/borg")], vec![disabled]);
        let settings = settings();
        let runner = ScriptedRunner::new(Vec::new());
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let run = orchestrator.run_create(&[], |_| {}).expect("run");
        assert_eq!(run.tasks[0].status, TaskStatus::Disabled);
        assert!(runner.calls().is_empty());
        assert!(hooks.calls().is_empty());
    }

    #[test]
    fn prune_mode_skips_hooks_and_backup() {
        let mut t = task("t", "r");
        t.pre = vec![Hook::new("pre")];
        t.post = vec![Hook::new("post")];
        t.keep = Some(RetentionPolicy::Single(daily(7)));
        let config = config_with(vec![repository("r", "/srv/borg")], vec![t]);
        let settings = settings();
        let runner = ScriptedRunner::new(Vec::new());
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let run = orchestrator.run_prune(&[], |_| {}).expect("run");
        assert_eq!(run.tasks[0].status, TaskStatus::Success);
        assert_eq!(runner.subcommands(), vec!["prune"]);
        assert!(hooks.calls().is_empty());
    }

    #[test]
    fn list_reports_archive_names() {
        let config = config_with(vec![repository("r", "/srv/borg")], vec![task("t", "r")]);
        let settings = settings();
        let runner = ScriptedRunner::new(vec![ScriptedCall::Stdout(
            r#"{"archives":[{"name":"a-1"},{"name":"a-2"}]}"#.to_string(),
        )]);
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let mut names = Vec::new();
        let run = orchestrator
            .run_list(&[], |event| {
                if let RunEvent::ArchiveListed { archive, .. } = event {
                    names.push(archive.to_string());
                }
            })
            .expect("run");
        assert_eq!(run.exit_code(), crate::exit_codes::OK);
        assert_eq!(names, vec!["a-1", "a-2"]);
    }

    #[test]
    fn garbage_list_output_fails_the_step() {
        let config = config_with(vec![repository("r", "/srv/borg")], vec![task("t", "r")]);
        let settings = settings();
        let runner = ScriptedRunner::new(vec![ScriptedCall::Stdout("not json".to_string())]);
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let mut reported = Vec::new();
        let run = orchestrator
            .run_list(&[], |event| {
                if let RunEvent::StepFinished { result, .. } = event {
                    reported.push(result.status.clone());
                }
            })
            .expect("run");
        assert_eq!(run.tasks[0].status, TaskStatus::Failed);
        let (step, reason) = run.tasks[0].failures().next().expect("failure");
        assert_eq!(*step, Step::List);
        assert!(reason.starts_with("unexpected list output"));
        let summary: Vec<StepStatus> =
            run.tasks[0].steps.iter().map(|step| step.status.clone()).collect();
        assert_eq!(reported, summary);
    }

    #[test]
    fn archives_are_parsed_only_from_json_listings() {
        let mut invocation = Invocation {
            program: "borg".into(),
            args: vec!["list".to_string()],
            env: Vec::new(),
            workdir: std::env::temp_dir(),
            json_output: true,
        };
        let mut result = ExternalCommandResult::success();
        result.stdout = br#"{"archives":[{"name":"host-1"},{"name":"host-2"}]}"#.to_vec();
        assert_eq!(
            parse_archives(&invocation, &result),
            Ok(vec!["host-1".to_string(), "host-2".to_string()])
        );

        result.stdout = b"host-1  Mon, 2024-01-01 00:00:00\n".to_vec();
        assert!(parse_archives(&invocation, &result).is_err());
        invocation.json_output = false;
        assert_eq!(parse_archives(&invocation, &result), Ok(Vec::new()));
    }

    #[test]
    fn check_visits_each_repository_once() {
        let config = config_with(
            vec![repository("r", "/srv/r"), repository("s", "/srv/s")],
            vec![task("a", "r"), task("b", "r"), task("c", "s")],
        );
        let settings = settings();
        let runner = ScriptedRunner::new(Vec::new());
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let run = orchestrator.run_check(&[], false, |_| {}).expect("run");
        let names: Vec<&str> = run.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["r", "s"]);
        assert_eq!(runner.subcommands(), vec!["check", "check"]);

        let err = orchestrator
            .run_check(&["nope".to_string()], true, |_| {})
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRepositoryName(_)));
    }

    #[test]
    fn held_lock_fails_the_task() {
        let repo = repository("r", "/srv/borg");
        let config = config_with(vec![repo.clone()], vec![task("t", "r")]);
        let settings = settings();
        let runner = ScriptedRunner::new(Vec::new());
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let held = RepositoryLock::acquire(&config.confdir, &repo).expect("lock");
        let run = orchestrator.run_create(&[], |_| {}).expect("run");
        drop(held);

        if cfg!(target_os = "linux") {
            assert_eq!(run.tasks[0].status, TaskStatus::Failed);
            assert!(runner.calls().is_empty());
        } else {
            assert_eq!(run.tasks[0].status, TaskStatus::Success);
        }
    }

    #[test]
    fn events_bracket_each_task() {
        let config = config_with(vec![repository("r", "/srv/borg")], vec![task("t", "r")]);
        let settings = settings();
        let runner = ScriptedRunner::new(Vec::new());
        let hooks = ScriptedHookRunner::default();
        let orchestrator =
            Orchestrator::new(&config, &settings, &runner, &hooks, CancelToken::new());

        let mut seen = Vec::new();
        orchestrator
            .run_create(&[], |event| {
                seen.push(match event {
                    RunEvent::TaskStarted { .. } => "started",
                    RunEvent::StepStarted { .. } => "step",
                    RunEvent::StepFinished { .. } => "step done",
                    RunEvent::TaskFinished { .. } => "finished",
                    _ => "other",
                })
            })
            .expect("run");
        assert_eq!(seen, vec!["started", "step", "step done", "finished"]);
    }
}
