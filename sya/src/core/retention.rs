//! Retention policies and their expansion into prune passes.
//!
//! A task's `keep` entry is either one rule or an ordered list of rules. Each
//! rule becomes its own `borg prune` invocation. Rules are never merged: a
//! list such as `[{within: 1y, monthly: 120}, {within: 2m, weekly: 1000000}]`
//! is how tiered retention is expressed, and merging would change which
//! archives each `within` cutoff protects.

use std::collections::BTreeMap;
use std::fmt;

/// Time granularity understood by `borg prune --keep-<unit>`.
///
/// Variant order is the order flags are emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetentionUnit {
    Last,
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RetentionUnit {
    pub const ALL: [RetentionUnit; 8] = [
        RetentionUnit::Last,
        RetentionUnit::Secondly,
        RetentionUnit::Minutely,
        RetentionUnit::Hourly,
        RetentionUnit::Daily,
        RetentionUnit::Weekly,
        RetentionUnit::Monthly,
        RetentionUnit::Yearly,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            RetentionUnit::Last => "last",
            RetentionUnit::Secondly => "secondly",
            RetentionUnit::Minutely => "minutely",
            RetentionUnit::Hourly => "hourly",
            RetentionUnit::Daily => "daily",
            RetentionUnit::Weekly => "weekly",
            RetentionUnit::Monthly => "monthly",
            RetentionUnit::Yearly => "yearly",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| unit.keyword() == keyword)
    }

    /// The `borg prune` flag for this unit, e.g. `--keep-daily`.
    pub fn flag(self) -> String {
        format!("--keep-{}", self.keyword())
    }
}

impl fmt::Display for RetentionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One prune pass: keep counts per unit, optionally limited by `within`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionRule {
    /// Age qualifier passed as `--keep-within`, e.g. `1y` or `2m`.
    pub within: Option<String>,
    pub keep: BTreeMap<RetentionUnit, u32>,
}

impl RetentionRule {
    pub fn is_empty(&self) -> bool {
        self.within.is_none() && self.keep.is_empty()
    }
}

impl fmt::Display for RetentionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(within) = &self.within {
            parts.push(format!("within={within}"));
        }
        for (unit, count) in &self.keep {
            parts.push(format!("{unit}={count}"));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// A task's `keep` setting as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionPolicy {
    Single(RetentionRule),
    Sequence(Vec<RetentionRule>),
}

/// A raw value from a rule mapping, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleValue<'a> {
    Count(i64),
    Text(&'a str),
}

/// Expand a policy into the ordered list of prune passes.
///
/// A single rule yields one pass; a sequence yields one pass per entry in
/// input order, each with its own `within`.
pub fn resolve_policy(policy: &RetentionPolicy) -> Vec<RetentionRule> {
    match policy {
        RetentionPolicy::Single(rule) => vec![rule.clone()],
        RetentionPolicy::Sequence(rules) => rules.clone(),
    }
}

/// Build a rule from `key: value` entries of one mapping.
///
/// Rejects unknown keys, non-positive counts, malformed `within` values and
/// rules with neither a unit nor `within`.
pub fn parse_rule<'a, I>(entries: I) -> Result<RetentionRule, String>
where
    I: IntoIterator<Item = (&'a str, RuleValue<'a>)>,
{
    let mut rule = RetentionRule::default();
    for (key, value) in entries {
        if key == "within" {
            let within = match value {
                RuleValue::Text(text) => text.trim(),
                RuleValue::Count(n) => {
                    return Err(format!("'within' needs a unit suffix, got {n}"));
                }
            };
            validate_within(within)?;
            rule.within = Some(within.to_string());
            continue;
        }
        let unit = RetentionUnit::from_keyword(key)
            .ok_or_else(|| format!("unknown retention key '{key}'"))?;
        let count = match value {
            RuleValue::Count(n) => n,
            RuleValue::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("'{key}' must be a number, got '{text}'"))?,
        };
        if count < 1 || count > i64::from(u32::MAX) {
            return Err(format!("'{key}' must be a positive count, got {count}"));
        }
        rule.keep.insert(unit, count as u32);
    }
    if rule.is_empty() {
        return Err("rule needs 'within' or at least one retention unit".to_string());
    }
    Ok(rule)
}

/// Check a `within` interval: a positive number followed by one of `Hdwmy`.
pub fn validate_within(within: &str) -> Result<(), String> {
    use std::sync::LazyLock;
    static WITHIN_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^[1-9][0-9]*[Hdwmy]$").unwrap());
    if WITHIN_RE.is_match(within) {
        Ok(())
    } else {
        Err(format!(
            "invalid 'within' interval '{within}' (expected e.g. 24H, 7d, 2w, 2m, 1y)"
        ))
    }
}
