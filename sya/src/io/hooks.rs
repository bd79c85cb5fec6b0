//! Hook runner for pre/post/mount/umount commands.
//!
//! Hooks run as `sh -c <command> sya [args...]` in the configuration
//! directory, so `$1` is the first extra argument (the post hook status).

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{Span, debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::ProcessError;
use crate::io::process::{CancelToken, POLL_INTERVAL, kill_and_reap};
use crate::model::Hook;

/// `$0` of every hook.
const HOOK_ARGV0: &str = "sya";

/// How long to keep reading output after `sh` exits. Background processes
/// started by a hook may hold the pipes open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Passed,
    Failed(String),
}

pub trait HookRunner {
    /// Run `hook` with `args` as `$1...`.
    ///
    /// A hook that runs and fails is `Ok(HookOutcome::Failed)`; errors are
    /// reserved for hooks that could not be run or were interrupted.
    fn run(&self, hook: &Hook, args: &[&str]) -> Result<HookOutcome, ProcessError>;
}

/// Runs hooks through `/bin/sh`, logging their output line by line as it
/// is written.
#[derive(Debug, Clone)]
pub struct ShellHookRunner {
    pub workdir: PathBuf,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    pub cancel: CancelToken,
}

impl HookRunner for ShellHookRunner {
    #[instrument(skip_all, fields(hook = %hook.command))]
    fn run(&self, hook: &Hook, args: &[&str]) -> Result<HookOutcome, ProcessError> {
        if self.dry_run {
            info!(args = ?args, "dry run, not running hook");
            return Ok(HookOutcome::Passed);
        }
        if self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        debug!("running hook");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&hook.command)
            .arg(HOOK_ARGV0)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::spawn("sh", err))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            kill_and_reap(&mut child);
            return Err(ProcessError::io(
                "capture hook output",
                io::Error::other("pipes were not captured"),
            ));
        };
        // Nothing is ever sent; the channel disconnects once both readers hit EOF.
        let (done_tx, done_rx) = mpsc::channel::<()>();
        spawn_line_logger(stdout, done_tx.clone());
        spawn_line_logger(stderr, done_tx);

        let started = Instant::now();
        let status = loop {
            if self.cancel.is_cancelled() {
                warn!("interrupted, killing hook");
                kill_and_reap(&mut child);
                return Err(ProcessError::Cancelled);
            }
            if let Some(timeout) = self.timeout
                && started.elapsed() >= timeout
            {
                warn!(timeout_secs = timeout.as_secs(), "hook timed out, killing");
                kill_and_reap(&mut child);
                return Ok(HookOutcome::Failed(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )));
            }
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    kill_and_reap(&mut child);
                    return Err(ProcessError::io("wait for hook", err));
                }
            }
        };

        if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(OUTPUT_GRACE) {
            debug!("hook left processes holding its output open, not waiting for them");
        }

        if status.success() {
            Ok(HookOutcome::Passed)
        } else {
            let reason = describe_status(status);
            warn!(%reason, "hook failed");
            Ok(HookOutcome::Failed(reason))
        }
    }
}

/// Log every non-blank line of `reader` inside the current span. The thread
/// is detached and outlives the hook if something else keeps the pipe open.
fn spawn_line_logger<R: Read + Send + 'static>(reader: R, done: Sender<()>) {
    let span = Span::current();
    thread::spawn(move || {
        let _entered = span.enter();
        let _done = done;
        forward_lines(reader, |line| info!("{line}"));
    });
}

/// Hand each non-blank line to `on_line` as soon as it is read.
fn forward_lines<R: Read>(reader: R, mut on_line: impl FnMut(&str)) {
    for line in BufReader::new(reader).split(b'\n') {
        let Ok(line) = line else { break };
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end();
        if !line.is_empty() {
            on_line(line);
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "killed by a signal".to_string(),
    }
}
