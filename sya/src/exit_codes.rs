//! Stable exit codes for sya CLI commands.

/// Every selected task succeeded or was disabled.
pub const OK: i32 = 0;
/// Invalid configuration or command line; nothing ran.
pub const INVALID: i32 = 1;
/// At least one task (or repository check) failed or was partial.
pub const FAILED: i32 = 2;
/// Interrupted by SIGINT.
pub const INTERRUPTED: i32 = 130;
