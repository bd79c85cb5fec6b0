//! I/O for sya commands: configuration files, list files, processes, hooks
//! and locks.

pub mod command;
pub mod config;
pub mod hooks;
pub mod lock;
pub mod process;
pub mod runner;
