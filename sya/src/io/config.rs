//! Configuration stored in `<confdir>/config.yaml`.
//!
//! ```yaml
//! sya:
//!   verbose: true
//!   hook-timeout: 600
//! repositories:
//!   nas:
//!     path: backup@nas:/srv/borg
//!     passphrase-file: nas.key
//! tasks:
//!   system:
//!     repository: nas
//!     include-file: system.lst
//!     keep:
//!       - {within: 1y, monthly: 120}
//!       - {within: 2m, weekly: 1000000}
//! ```
//!
//! The document is parsed into raw serde structs and then validated into the
//! [`crate::model`] types. Repository and task order is kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::{self, Deserializer};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::core::retention::{RetentionPolicy, RetentionRule, RuleValue, parse_rule};
use crate::error::ConfigError;
use crate::model::{
    Config, DEFAULT_PREFIX, GlobalOptions, Hook, Repository, Task, resolve_in,
};

/// Configuration directory used when `-d` is not given.
pub const DEFAULT_CONFDIR: &str = "/etc/borg-sya";
/// File name of the configuration inside the directory.
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    #[serde(default)]
    sya: Option<RawGlobal>,
    #[serde(default)]
    repositories: Option<Mapping>,
    #[serde(default)]
    tasks: Option<Mapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct RawGlobal {
    #[serde(deserialize_with = "deserialize_flag")]
    verbose: bool,
    borg: Option<PathBuf>,
    /// Seconds.
    hook_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawRepository {
    path: String,
    #[serde(default)]
    passphrase: Option<String>,
    #[serde(default)]
    passphrase_file: Option<PathBuf>,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    remote_path: Option<String>,
    #[serde(default)]
    mount: RawHooks,
    #[serde(default)]
    umount: RawHooks,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawTask {
    #[serde(default = "enabled_by_default", deserialize_with = "deserialize_flag")]
    run_this: bool,
    repository: String,
    #[serde(default)]
    pre: RawHooks,
    #[serde(default)]
    post: RawHooks,
    #[serde(default)]
    includes: Vec<String>,
    #[serde(default)]
    include_file: Option<PathBuf>,
    #[serde(default)]
    exclude_file: Option<PathBuf>,
    #[serde(default)]
    path_prefix: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    keep: Option<RawKeep>,
}

/// A hook list may be written as a single command.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHooks {
    One(String),
    Many(Vec<String>),
}

impl Default for RawHooks {
    fn default() -> Self {
        RawHooks::Many(Vec::new())
    }
}

impl RawHooks {
    fn into_hooks(self) -> Vec<Hook> {
        match self {
            RawHooks::One(command) => vec![Hook::new(command)],
            RawHooks::Many(commands) => commands.into_iter().map(Hook::new).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeep {
    Single(Mapping),
    Sequence(Vec<Mapping>),
}

fn enabled_by_default() -> bool {
    true
}

/// Accept YAML booleans and the `yes`/`no`/`on`/`off` spellings YAML 1.2
/// no longer treats as booleans.
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(flag) => Ok(flag),
        Value::String(text) => parse_flag(&text).ok_or_else(|| {
            de::Error::invalid_value(de::Unexpected::Str(&text), &"yes, no, on, off, true or false")
        }),
        other => Err(de::Error::custom(format!(
            "expected yes or no, got {other:?}"
        ))),
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "yes" | "on" | "true" => Some(true),
        "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

/// Load and validate `<confdir>/config.yaml`.
pub fn load_config(confdir: &Path) -> Result<Config, ConfigError> {
    let path = confdir.join(CONFIG_FILE);
    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), "loading configuration");
    parse_config(confdir, &path, &contents)
}

/// Parse a configuration document read from `path`.
pub fn parse_config(confdir: &Path, path: &Path, contents: &str) -> Result<Config, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let raw: RawDocument = if contents.trim().is_empty() {
        RawDocument::default()
    } else {
        serde_yaml::from_str(contents).map_err(|err| parse_error(err.to_string()))?
    };

    let options = build_options(raw.sya.unwrap_or_default())?;

    let mut repositories = Vec::new();
    for (name, value) in named_entries(raw.repositories, "repositories", &parse_error)? {
        let raw_repo: RawRepository = serde_yaml::from_value(value)
            .map_err(|err| parse_error(format!("repository '{name}': {err}")))?;
        repositories.push(build_repository(confdir, name, raw_repo)?);
    }

    let mut tasks = Vec::new();
    for (name, value) in named_entries(raw.tasks, "tasks", &parse_error)? {
        let raw_task: RawTask = serde_yaml::from_value(value)
            .map_err(|err| parse_error(format!("task '{name}': {err}")))?;
        tasks.push(build_task(confdir, name, raw_task)?);
    }

    let config = Config {
        confdir: confdir.to_path_buf(),
        options,
        repositories,
        tasks,
    };
    for task in &config.tasks {
        config.repository_for(task)?;
    }
    debug!(
        repositories = config.repositories.len(),
        tasks = config.tasks.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// `(name, value)` pairs of a section, in document order.
fn named_entries(
    section: Option<Mapping>,
    label: &str,
    parse_error: &dyn Fn(String) -> ConfigError,
) -> Result<Vec<(String, Value)>, ConfigError> {
    let mut entries: Vec<(String, Value)> = Vec::new();
    for (key, value) in section.unwrap_or_default() {
        let name = match key {
            Value::String(name) if !name.trim().is_empty() => name,
            other => {
                return Err(parse_error(format!(
                    "{label}: names must be non-empty strings, got {other:?}"
                )));
            }
        };
        if entries.iter().any(|(seen, _)| *seen == name) {
            return Err(parse_error(format!("{label}: duplicate name '{name}'")));
        }
        entries.push((name, value));
    }
    Ok(entries)
}

fn build_options(raw: RawGlobal) -> Result<GlobalOptions, ConfigError> {
    let hook_timeout = match raw.hook_timeout {
        Some(0) => {
            return Err(ConfigError::Invalid(
                "sya: hook-timeout must be > 0".to_string(),
            ));
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };
    Ok(GlobalOptions {
        verbose: raw.verbose,
        borg: raw.borg,
        hook_timeout,
    })
}

fn build_repository(
    confdir: &Path,
    name: String,
    raw: RawRepository,
) -> Result<Repository, ConfigError> {
    if raw.path.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository '{name}': 'path' must not be empty"
        )));
    }
    let passphrase = match (raw.passphrase, raw.passphrase_file) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(format!(
                "repository '{name}': set either 'passphrase' or 'passphrase-file', not both"
            )));
        }
        (Some(passphrase), None) => Some(passphrase),
        (None, Some(file)) => Some(read_passphrase(confdir, &name, &file)?),
        (None, None) => None,
    };
    Ok(Repository {
        name,
        path: raw.path,
        passphrase,
        compression: raw.compression,
        remote_path: raw.remote_path,
        mount: raw.mount.into_hooks(),
        umount: raw.umount.into_hooks(),
    })
}

/// First line of the passphrase file, trimmed.
fn read_passphrase(confdir: &Path, repository: &str, file: &Path) -> Result<String, ConfigError> {
    let path = resolve_in(confdir, file);
    let contents = fs::read_to_string(&path).map_err(|source| ConfigError::PassphraseFile {
        repository: repository.to_string(),
        path: path.clone(),
        source,
    })?;
    Ok(contents.lines().next().unwrap_or_default().trim().to_string())
}

fn build_task(confdir: &Path, name: String, raw: RawTask) -> Result<Task, ConfigError> {
    if raw.includes.is_empty() && raw.include_file.is_none() {
        return Err(ConfigError::MissingIncludes { task: name });
    }
    if let Some(path) = raw.includes.iter().find(|path| !Path::new(path.as_str()).is_absolute()) {
        return Err(ConfigError::RelativePath {
            task: name,
            path: path.clone(),
        });
    }
    if let Some(prefix) = &raw.path_prefix
        && !Path::new(prefix).is_absolute()
    {
        return Err(ConfigError::RelativePath {
            task: name,
            path: prefix.clone(),
        });
    }
    let prefix = raw.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    if prefix.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "task '{name}': 'prefix' must not be empty"
        )));
    }
    let keep = raw
        .keep
        .map(|keep| build_policy(keep).map_err(|reason| ConfigError::InvalidRetention {
            task: name.clone(),
            reason,
        }))
        .transpose()?;

    Ok(Task {
        enabled: raw.run_this,
        repository: raw.repository,
        pre: raw.pre.into_hooks(),
        post: raw.post.into_hooks(),
        includes: raw.includes,
        include_file: raw.include_file.map(|file| resolve_in(confdir, file)),
        exclude_file: raw.exclude_file.map(|file| resolve_in(confdir, file)),
        path_prefix: raw.path_prefix,
        prefix,
        keep,
        name,
    })
}

fn build_policy(raw: RawKeep) -> Result<RetentionPolicy, String> {
    match raw {
        RawKeep::Single(mapping) => Ok(RetentionPolicy::Single(build_rule(&mapping)?)),
        RawKeep::Sequence(mappings) => {
            if mappings.is_empty() {
                return Err("empty list of rules".to_string());
            }
            let rules = mappings
                .iter()
                .enumerate()
                .map(|(index, mapping)| {
                    build_rule(mapping).map_err(|reason| format!("rule #{}: {reason}", index + 1))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RetentionPolicy::Sequence(rules))
        }
    }
}

fn build_rule(mapping: &Mapping) -> Result<RetentionRule, String> {
    let mut entries = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| format!("retention keys must be strings, got {key:?}"))?;
        let value = match value {
            Value::Number(number) => RuleValue::Count(
                number
                    .as_i64()
                    .ok_or_else(|| format!("'{key}' must be a whole number, got {number}"))?,
            ),
            Value::String(text) => RuleValue::Text(text.as_str()),
            other => return Err(format!("'{key}' has an unsupported value {other:?}")),
        };
        entries.push((key, value));
    }
    parse_rule(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retention::{RetentionUnit, resolve_policy};

    fn parse(contents: &str) -> Result<Config, ConfigError> {
        let dir = Path::new("/etc/borg-sya");
        parse_config(dir, &dir.join(CONFIG_FILE), contents)
    }

    const BASIC: &str = r#"
sya:
  verbose: yes
  hook-timeout: 30
repositories:
  nas:
    path: backup@nas:/srv/borg
    passphrase: hunter2
    compression: lz4
    mount: mount /mnt/nas
    umount: [sync, umount /mnt/nas]
tasks:
  system:
    repository: nas
    include-file: system.lst
    exclude-file: /etc/borg-sya/system.exclude
    pre: [echo one, echo two]
    keep:
      - {within: 1y, monthly: 120}
      - {within: 2m, weekly: 1000000}
  home:
    run-this: no
    repository: nas
    includes: [/home]
    prefix: home
    keep: {hourly: 24, daily: 8}
"#;

    #[test]
    fn parses_sections_in_document_order() {
        let config = parse(BASIC).expect("config");
        assert!(config.options.verbose);
        assert_eq!(config.options.hook_timeout, Some(Duration::from_secs(30)));

        let repo = config.repository("nas").expect("nas");
        assert_eq!(repo.passphrase.as_deref(), Some("hunter2"));
        assert_eq!(repo.mount, vec![Hook::new("mount /mnt/nas")]);
        assert_eq!(repo.umount.len(), 2);

        let names: Vec<&str> = config.tasks.iter().map(|task| task.name.as_str()).collect();
        assert_eq!(names, vec!["system", "home"]);

        let system = config.task("system").expect("system");
        assert!(system.enabled);
        assert_eq!(system.prefix, "{hostname}");
        assert_eq!(
            system.include_file.as_deref(),
            Some(Path::new("/etc/borg-sya/system.lst"))
        );
        assert_eq!(system.pre.len(), 2);
        let passes = resolve_policy(system.keep.as_ref().expect("keep"));
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].within.as_deref(), Some("1y"));
        assert_eq!(passes[1].keep.get(&RetentionUnit::Weekly), Some(&1_000_000));

        let home = config.task("home").expect("home");
        assert!(!home.enabled);
        assert_eq!(home.archive_prefix(), "home-");
        assert!(matches!(home.keep, Some(RetentionPolicy::Single(_))));
    }

    #[test]
    fn run_this_accepts_yaml_spellings() {
        for (text, expected) in [("on", true), ("off", false), ("true", true), ("No", false)] {
            let doc = format!(
                "repositories:\n  r: {{path: /srv/borg}}\ntasks:\n  t:\n    repository: r\n    includes: [/etc]\n    run-this: {text}\n"
            );
            let config = parse(&doc).expect("config");
            assert_eq!(config.tasks[0].enabled, expected, "run-this: {text}");
        }
        let err = parse(
            "repositories:\n  r: {path: /srv/borg}\ntasks:\n  t: {repository: r, includes: [/etc], run-this: maybe}\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn verbose_accepts_yaml_spellings_and_defaults_off() {
        assert!(parse("sya:\n  verbose: yes\n").expect("yes").options.verbose);
        assert!(!parse("sya:\n  verbose: off\n").expect("off").options.verbose);
        assert!(!parse("sya:\n  hook-timeout: 5\n").expect("absent").options.verbose);
    }

    #[test]
    fn unknown_repository_is_rejected() {
        let err = parse("tasks:\n  t: {repository: gone, includes: [/etc]}\n").unwrap_err();
        assert!(
            matches!(err, ConfigError::UnknownRepository { ref task, ref repository } if task == "t" && repository == "gone")
        );
    }

    #[test]
    fn includes_are_mandatory_and_absolute() {
        let err = parse("repositories:\n  r: {path: /srv}\ntasks:\n  t: {repository: r}\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingIncludes { .. }));

        let err = parse("repositories:\n  r: {path: /srv}\ntasks:\n  t: {repository: r, includes: [etc]}\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::RelativePath { ref path, .. } if path == "etc"));
    }

    #[test]
    fn malformed_retention_is_rejected() {
        let base = "repositories:\n  r: {path: /srv}\ntasks:\n  t:\n    repository: r\n    includes: [/etc]\n";
        for keep in [
            "    keep: {fortnightly: 2}\n",
            "    keep: {daily: 0}\n",
            "    keep: {within: 1year}\n",
            "    keep: []\n",
            "    keep: [{daily: 7}, {}]\n",
        ] {
            let err = parse(&format!("{base}{keep}")).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidRetention { .. }),
                "{keep}: {err}"
            );
        }
    }

    #[test]
    fn empty_document_has_no_tasks() {
        let config = parse("").expect("config");
        assert!(config.tasks.is_empty());
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse("repositories:\n  r: {path: /srv, colour: blue}\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref message, .. } if message.contains("repository 'r'")));
    }

    #[test]
    fn passphrase_file_first_line_is_used() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("nas.key"), "  s3cret \nignored\n").expect("write key");
        fs::write(
            temp.path().join(CONFIG_FILE),
            "repositories:\n  nas: {path: /srv/borg, passphrase-file: nas.key}\n",
        )
        .expect("write config");

        let config = load_config(temp.path()).expect("config");
        assert_eq!(config.repositories[0].passphrase.as_deref(), Some("s3cret"));
    }

    #[test]
    fn missing_passphrase_file_is_a_config_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(CONFIG_FILE),
            "repositories:\n  nas: {path: /srv/borg, passphrase-file: nas.key}\n",
        )
        .expect("write config");

        let err = load_config(temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::PassphraseFile { .. }));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
