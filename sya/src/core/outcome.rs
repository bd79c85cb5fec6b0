//! Step and task results, and the run summary derived from them.

use std::fmt;

use crate::core::retention::RetentionRule;
use crate::exit_codes;

/// One unit of work within a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Lock,
    Mount(String),
    PreHook(String),
    Backup,
    /// Zero-based pass index and the rule it applied.
    Prune(usize, RetentionRule),
    PostHook(String),
    Umount(String),
    Check,
    List,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Lock => f.write_str("lock"),
            Step::Mount(cmd) => write!(f, "mount hook `{cmd}`"),
            Step::PreHook(cmd) => write!(f, "pre hook `{cmd}`"),
            Step::Backup => f.write_str("backup"),
            Step::Prune(index, rule) => write!(f, "prune #{} {rule}", index + 1),
            Step::PostHook(cmd) => write!(f, "post hook `{cmd}`"),
            Step::Umount(cmd) => write!(f, "umount hook `{cmd}`"),
            Step::Check => f.write_str("check"),
            Step::List => f.write_str("list"),
        }
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    /// borg exited with rc 1; the operation completed.
    Warning,
    Failed(String),
}

impl StepStatus {
    pub fn is_ok(&self) -> bool {
        !matches!(self, StepStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: Step,
    pub status: StepStatus,
}

impl StepResult {
    pub fn new(step: Step, status: StepStatus) -> Self {
        Self { step, status }
    }

    pub fn failed(step: Step, reason: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Failed(reason.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    /// Backup succeeded but a prune pass, post hook or umount hook failed.
    Partial,
    Failed,
    Disabled,
    /// Not started because the run was interrupted.
    Cancelled,
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Success => "ok",
            TaskStatus::Partial => "partial",
            TaskStatus::Failed => "failed",
            TaskStatus::Disabled => "disabled",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn is_clean(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Disabled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything that happened for one task (or one repository for `check`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub name: String,
    pub status: TaskStatus,
    pub steps: Vec<StepResult>,
}

impl TaskOutcome {
    pub fn new(name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            name: name.into(),
            status,
            steps: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Step, &str)> {
        self.steps.iter().filter_map(|result| match &result.status {
            StepStatus::Failed(reason) => Some((&result.step, reason.as_str())),
            _ => None,
        })
    }

    /// Steps of one kind, e.g. every prune pass.
    pub fn steps_matching(&self, pred: impl Fn(&Step) -> bool) -> Vec<&StepResult> {
        self.steps.iter().filter(|result| pred(&result.step)).collect()
    }
}

/// Aggregate over all selected tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub tasks: Vec<TaskOutcome>,
    pub interrupted: bool,
}

impl RunOutcome {
    pub fn task(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|task| task.name == name)
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            exit_codes::INTERRUPTED
        } else if self.tasks.iter().all(|task| task.status.is_clean()) {
            exit_codes::OK
        } else {
            exit_codes::FAILED
        }
    }

    /// One line per task, followed by an indented line per failed step.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for task in &self.tasks {
            lines.push(format!("{}: {}", task.name, task.status));
            for (step, reason) in task.failures() {
                lines.push(format!("  {step}: {reason}"));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, status: TaskStatus) -> TaskOutcome {
        TaskOutcome::new(name, status)
    }

    #[test]
    fn exit_code_ok_when_all_clean() {
        let run = RunOutcome {
            tasks: vec![
                outcome("a", TaskStatus::Success),
                outcome("b", TaskStatus::Disabled),
            ],
            interrupted: false,
        };
        assert_eq!(run.exit_code(), exit_codes::OK);
    }

    #[test]
    fn exit_code_failed_on_partial() {
        let run = RunOutcome {
            tasks: vec![
                outcome("a", TaskStatus::Success),
                outcome("b", TaskStatus::Partial),
            ],
            interrupted: false,
        };
        assert_eq!(run.exit_code(), exit_codes::FAILED);
    }

    #[test]
    fn interruption_wins() {
        let run = RunOutcome {
            tasks: vec![outcome("a", TaskStatus::Cancelled)],
            interrupted: true,
        };
        assert_eq!(run.exit_code(), exit_codes::INTERRUPTED);
    }

    #[test]
    fn summary_lists_failed_steps() {
        let mut task = outcome("docs", TaskStatus::Failed);
        task.steps.push(StepResult::new(
            Step::PreHook("true".to_string()),
            StepStatus::Succeeded,
        ));
        task.steps
            .push(StepResult::failed(Step::Backup, "borg exited with code 2"));
        let run = RunOutcome {
            tasks: vec![task],
            interrupted: false,
        };
        assert_eq!(
            run.summary_lines(),
            vec![
                "docs: failed".to_string(),
                "  backup: borg exited with code 2".to_string()
            ]
        );
    }
}
