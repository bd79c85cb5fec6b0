//! Resolves list files and turns tasks into invocations.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::core::invocation::{Action, Invocation, build_invocation};
use crate::core::patterns::{PathSets, parse_exclude_list, parse_include_list};
use crate::core::retention::{RetentionRule, resolve_policy};
use crate::error::ConfigError;
use crate::model::{Repository, Task};
use crate::settings::RunSettings;

/// Builds borg invocations for one run.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    settings: &'a RunSettings,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(settings: &'a RunSettings) -> Self {
        Self { settings }
    }

    /// Inline includes plus the task's list files, re-rooted under
    /// `path-prefix` when set.
    pub fn path_sets(&self, task: &Task) -> Result<PathSets, ConfigError> {
        let mut sets = PathSets::default();
        for include in &task.includes {
            sets.include(include.as_str());
        }
        if let Some(file) = &task.include_file {
            sets.extend(parse_include_list(&read_list(task, file)?));
        }
        if let Some(file) = &task.exclude_file {
            for exclude in parse_exclude_list(&read_list(task, file)?) {
                sets.exclude(exclude);
            }
        }
        if sets.includes.is_empty() {
            return Err(ConfigError::MissingIncludes {
                task: task.name.clone(),
            });
        }
        if let Some(path) = sets.first_relative() {
            return Err(ConfigError::RelativePath {
                task: task.name.clone(),
                path: path.to_string(),
            });
        }
        debug!(
            task = %task.name,
            includes = sets.includes.len(),
            excludes = sets.excludes.len(),
            "resolved path selection"
        );
        Ok(match &task.path_prefix {
            Some(prefix) => sets.rebase(prefix),
            None => sets,
        })
    }

    pub fn backup(&self, repo: &Repository, task: &Task) -> Result<Invocation, ConfigError> {
        let paths = self.path_sets(task)?;
        Ok(build_invocation(
            self.settings,
            repo,
            Some(task),
            &Action::Backup,
            &paths,
        ))
    }

    /// One prune invocation per retention pass, in policy order.
    pub fn prunes(&self, repo: &Repository, task: &Task) -> Vec<(RetentionRule, Invocation)> {
        let Some(policy) = &task.keep else {
            return Vec::new();
        };
        resolve_policy(policy)
            .into_iter()
            .map(|rule| {
                let invocation = build_invocation(
                    self.settings,
                    repo,
                    Some(task),
                    &Action::Prune(rule.clone()),
                    &PathSets::default(),
                );
                (rule, invocation)
            })
            .collect()
    }

    pub fn check(&self, repo: &Repository) -> Invocation {
        build_invocation(
            self.settings,
            repo,
            None,
            &Action::Check,
            &PathSets::default(),
        )
    }

    pub fn list(&self, repo: &Repository, task: &Task) -> Invocation {
        build_invocation(
            self.settings,
            repo,
            Some(task),
            &Action::List,
            &PathSets::default(),
        )
    }
}

fn read_list(task: &Task, path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::ListFile {
        task: task.name.clone(),
        path: path.to_path_buf(),
        source,
    })
}
