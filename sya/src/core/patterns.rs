//! Include/exclude path lists.
//!
//! List files hold one path per line. In an include file a line starting
//! with `- ` is an exclude, which lets one file describe a whole selection:
//!
//! ```text
//! /etc
//! /var
//! - /var/log
//! ```

use std::path::{MAIN_SEPARATOR, Path};

/// Paths handed to `borg create`, in first-seen order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSets {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl PathSets {
    pub fn include(&mut self, path: impl Into<String>) {
        push_unique(&mut self.includes, path.into());
    }

    pub fn exclude(&mut self, path: impl Into<String>) {
        push_unique(&mut self.excludes, path.into());
    }

    /// Append another selection, keeping order and dropping duplicates.
    pub fn extend(&mut self, other: PathSets) {
        for path in other.includes {
            self.include(path);
        }
        for path in other.excludes {
            self.exclude(path);
        }
    }

    /// First path that is not absolute, if any.
    ///
    /// Excludes written with a borg pattern style (`sh:`, `re:`, ...) are
    /// left to borg.
    pub fn first_relative(&self) -> Option<&str> {
        self.includes
            .iter()
            .chain(self.excludes.iter().filter(|path| !has_pattern_style(path)))
            .find(|path| !Path::new(path.as_str()).is_absolute())
            .map(String::as_str)
    }

    /// Re-root every path under `prefix`, e.g. a snapshot mounted at
    /// `/mnt/snap` turns `/home` into `/mnt/snap/home`.
    ///
    /// Paths must already be absolute. Styled excludes are kept as written.
    pub fn rebase(&self, prefix: &str) -> PathSets {
        let join = |path: &String| {
            if has_pattern_style(path) {
                return path.clone();
            }
            let relative = path.trim_start_matches(MAIN_SEPARATOR);
            Path::new(prefix).join(relative).to_string_lossy().into_owned()
        };
        PathSets {
            includes: self.includes.iter().map(join).collect(),
            excludes: self.excludes.iter().map(join).collect(),
        }
    }
}

/// Parse a combined include file (`- ` marks excludes).
pub fn parse_include_list(contents: &str) -> PathSets {
    let mut sets = PathSets::default();
    for line in significant_lines(contents) {
        match line.strip_prefix("- ") {
            Some(excluded) => sets.exclude(excluded),
            None => sets.include(line),
        }
    }
    sets
}

/// Parse an exclude file: every line is an exclude.
pub fn parse_exclude_list(contents: &str) -> Vec<String> {
    let mut excludes = Vec::new();
    for line in significant_lines(contents) {
        push_unique(&mut excludes, line.to_string());
    }
    excludes
}

/// Lines without their line terminator, skipping blanks and `#` comments.
fn significant_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
}

/// True for borg pattern-style selectors such as `sh:**/.cache`.
fn has_pattern_style(path: &str) -> bool {
    ["fm:", "sh:", "re:", "pp:", "pf:"]
        .iter()
        .any(|style| path.starts_with(style))
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
