//! Configuration-driven frontend for borg backup.
//!
//! A configuration directory describes repositories and backup tasks; sya
//! turns each task into hook runs and borg invocations and reports a summary.
//!
//! - **[`core`]**: Pure logic (retention rules, path lists, invocation
//!   building, borg record parsing, outcomes). No I/O.
//! - **[`io`]**: Config and list files, process execution, hooks and the
//!   repository lock.
//!
//! [`orchestrate`] ties the two together for the `create`, `prune`, `check`
//! and `list` commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod model;
pub mod orchestrate;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
