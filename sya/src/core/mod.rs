//! Pure logic: retention expansion, list parsing, command building, results.
//!
//! Nothing in here touches the filesystem or spawns processes.

pub mod invocation;
pub mod messages;
pub mod outcome;
pub mod patterns;
pub mod retention;
