//! Spawning borg and streaming its `--log-json` records.
//!
//! borg writes one JSON record per line to stderr. A reader thread parses
//! them and hands them over a bounded channel, so a slow consumer makes the
//! reader block instead of buffering the whole log. stdout is drained by a
//! second thread into a bounded buffer.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::invocation::Invocation;
use crate::core::messages::{BorgMessage, Disposition};
use crate::error::ProcessError;

/// Bound on captured stdout and raw stderr text.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;
/// Records buffered between the stderr reader and the consumer.
const RECORD_CHANNEL_CAPACITY: usize = 64;
/// How often blocking waits check the cancellation token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// A JSON record split over more lines than this is treated as text.
const MAX_RECORD_LINES: usize = 64;

/// Shared interrupt flag, set from the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How an external command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    /// rc 1: borg finished but reported warnings.
    Warning,
    Failure(i32),
    Signal(i32),
}

impl ExitKind {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ExitKind::Success,
            Some(1) => ExitKind::Warning,
            Some(code) => ExitKind::Failure(code),
            None => ExitKind::Signal(signal_of(status)),
        }
    }

    /// Success and warning both mean the operation completed.
    pub fn is_ok(self) -> bool {
        matches!(self, ExitKind::Success | ExitKind::Warning)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Success => f.write_str("succeeded"),
            ExitKind::Warning => f.write_str("finished with warnings"),
            ExitKind::Failure(code) => write!(f, "exited with code {code}"),
            ExitKind::Signal(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or_default()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> i32 {
    0
}

/// Everything captured from one external command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalCommandResult {
    pub status: ExitKind,
    /// Every JSON record, in emission order.
    pub records: Vec<BorgMessage>,
    /// stderr lines that were not JSON records.
    pub stderr: String,
    pub stdout: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl ExternalCommandResult {
    pub fn success() -> Self {
        Self::with_status(ExitKind::Success)
    }

    pub fn with_status(status: ExitKind) -> Self {
        Self {
            status,
            records: Vec::new(),
            stderr: String::new(),
            stdout: Vec::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
        }
    }

    /// Messages of records carrying a borg error msgid.
    pub fn error_messages(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| record.is_error())
            .filter_map(|record| match record {
                BorgMessage::LogMessage { message, .. } => Some(message.trim_end()),
                _ => None,
            })
            .collect()
    }

    /// Why the command failed, or `None` when it completed.
    pub fn failure_reason(&self) -> Option<String> {
        if self.status.is_ok() {
            return None;
        }
        let detail = self
            .error_messages()
            .first()
            .map(|message| message.to_string())
            .or_else(|| {
                self.stderr
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .map(str::to_string)
            });
        Some(match detail {
            Some(detail) => format!("borg {}: {detail}", self.status),
            None => format!("borg {}", self.status),
        })
    }
}

/// One item read from the child's stderr.
#[derive(Debug, Clone, PartialEq)]
pub enum StderrItem {
    Record(BorgMessage),
    Text(String),
}

/// Lazy, finite stream of stderr items.
///
/// Ends when the child closes stderr. Yields [`ProcessError::Cancelled`]
/// once if the token fires, then ends.
pub struct RecordStream {
    rx: Receiver<io::Result<StderrItem>>,
    cancel: CancelToken,
    done: bool,
}

impl Iterator for RecordStream {
    type Item = Result<StderrItem, ProcessError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.cancel.is_cancelled() {
                self.done = true;
                return Some(Err(ProcessError::Cancelled));
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(item)) => return Some(Ok(item)),
                Ok(Err(err)) => {
                    self.done = true;
                    return Some(Err(ProcessError::io("read stderr", err)));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.done = true,
            }
        }
        None
    }
}

type OutputHandle = thread::JoinHandle<io::Result<(Vec<u8>, usize)>>;

/// A spawned child. Killed and reaped when dropped before [`finish`].
///
/// [`finish`]: RunningProcess::finish
pub struct RunningProcess {
    child: Option<Child>,
    stdout: Option<OutputHandle>,
    records: RecordStream,
    cancel: CancelToken,
}

impl RunningProcess {
    /// Spawn `invocation` with stdin closed and both pipes captured.
    pub fn spawn(
        invocation: &Invocation,
        cancel: &CancelToken,
        output_limit_bytes: usize,
    ) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .current_dir(&invocation.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, "failed to spawn command");
                return Err(ProcessError::spawn(&invocation.program, err));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            kill_and_reap(&mut child);
            return Err(ProcessError::io(
                "capture output",
                io::Error::other("pipes were not captured"),
            ));
        };

        let (tx, rx) = sync_channel(RECORD_CHANNEL_CAPACITY);
        let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
        thread::spawn(move || read_stderr(stderr, tx));

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout_handle),
            records: RecordStream {
                rx,
                cancel: cancel.clone(),
                done: false,
            },
            cancel: cancel.clone(),
        })
    }

    pub fn records(&mut self) -> &mut RecordStream {
        &mut self.records
    }

    /// Wait for the child to exit and collect stdout.
    ///
    /// Polls the cancellation token while waiting; on cancellation the child
    /// is killed and reaped before returning [`ProcessError::Cancelled`].
    pub fn finish(mut self) -> Result<(ExitStatus, Vec<u8>, usize), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Err(ProcessError::io(
                "wait for command",
                io::Error::other("child already reaped"),
            ));
        };
        let status = loop {
            if self.cancel.is_cancelled() {
                warn!("interrupted, killing child process");
                kill_and_reap(&mut child);
                return Err(ProcessError::Cancelled);
            }
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    kill_and_reap(&mut child);
                    return Err(ProcessError::io("wait for command", err));
                }
            }
        };

        let (stdout, stdout_truncated) = match self.stdout.take() {
            Some(handle) => join_output(handle)?,
            None => (Vec::new(), 0),
        };
        Ok((status, stdout, stdout_truncated))
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("dropping running process, killing child");
            kill_and_reap(&mut child);
        }
    }
}

pub(crate) fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill child");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "reap child");
    }
}

/// Run `invocation` to completion, handing every record to `on_record` as it
/// arrives.
///
/// A non-zero exit is reported in the result, not as an error.
#[instrument(skip_all, fields(subcommand = invocation.args.first().map(String::as_str).unwrap_or_default()))]
pub fn run_invocation(
    invocation: &Invocation,
    cancel: &CancelToken,
    output_limit_bytes: usize,
    on_record: &mut dyn FnMut(&BorgMessage),
) -> Result<ExternalCommandResult, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }
    info!(command = %invocation.command_line(), "running");
    let mut process = RunningProcess::spawn(invocation, cancel, output_limit_bytes)?;

    let mut records = Vec::new();
    let mut stderr = String::new();
    let mut stderr_truncated = 0usize;
    for item in process.records() {
        match item? {
            StderrItem::Record(record) => {
                on_record(&record);
                records.push(record);
            }
            StderrItem::Text(line) => {
                debug!(line = %line, "stderr");
                let remaining = output_limit_bytes.saturating_sub(stderr.len());
                if line.len() < remaining {
                    stderr.push_str(&line);
                    stderr.push('\n');
                } else {
                    stderr_truncated += line.len() + 1;
                }
            }
        }
    }

    let (status, stdout, stdout_truncated) = process.finish()?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }
    let status = ExitKind::from_status(status);
    debug!(%status, records = records.len(), "command finished");
    Ok(ExternalCommandResult {
        status,
        records,
        stderr,
        stdout,
        stdout_truncated,
        stderr_truncated,
    })
}

/// Surface a borg record in our own log.
pub fn log_record(record: &BorgMessage) {
    match record.disposition() {
        Disposition::Error(message) => error!(msgid = record.msgid(), "{message}"),
        Disposition::Prompt(message) => warn!(msgid = record.msgid(), "borg asks: {message}"),
        Disposition::Output(message) | Disposition::Progress(message) => info!("{message}"),
        Disposition::Debug(message) => debug!("{message}"),
        Disposition::Ignore => {}
    }
}

/// Parse stderr into records and text lines until EOF or until the
/// receiving side goes away.
///
/// A line starting with `{` that does not parse yet is joined with the
/// following lines, since borg may split a record.
fn read_stderr<R: Read>(reader: R, tx: SyncSender<io::Result<StderrItem>>) {
    let mut reader = BufReader::new(reader);
    let mut pending = String::new();
    let mut pending_lines = 0usize;
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        }
        let text = String::from_utf8_lossy(&line);
        let item = if pending.is_empty() && !text.trim_start().starts_with('{') {
            let text = text.trim_end();
            (!text.is_empty()).then(|| StderrItem::Text(text.to_string()))
        } else {
            pending.push_str(&text);
            pending_lines += 1;
            match serde_json::from_str::<BorgMessage>(&pending) {
                Ok(record) => {
                    pending.clear();
                    pending_lines = 0;
                    Some(StderrItem::Record(record))
                }
                Err(err) if err.is_eof() && pending_lines < MAX_RECORD_LINES => None,
                Err(_) => {
                    let raw = std::mem::take(&mut pending);
                    pending_lines = 0;
                    Some(StderrItem::Text(raw.trim_end().to_string()))
                }
            }
        };
        if let Some(item) = item
            && tx.send(Ok(item)).is_err()
        {
            return;
        }
    }
    if !pending.trim().is_empty() {
        let _ = tx.send(Ok(StderrItem::Text(pending.trim_end().to_string())));
    }
}

fn join_output(handle: OutputHandle) -> Result<(Vec<u8>, usize), ProcessError> {
    match handle.join() {
        Ok(result) => result.map_err(|err| ProcessError::io("read stdout", err)),
        Err(_) => Err(ProcessError::io(
            "read stdout",
            io::Error::other("output reader thread panicked"),
        )),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn shell(script: &str) -> Invocation {
        Invocation {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec![("SYA_TEST".to_string(), "42".to_string())],
            workdir: std::env::temp_dir(),
            json_output: false,
        }
    }

    fn run(script: &str) -> ExternalCommandResult {
        run_invocation(
            &shell(script),
            &CancelToken::new(),
            DEFAULT_OUTPUT_LIMIT_BYTES,
            &mut |_| {},
        )
        .expect("run")
    }

    #[test]
    fn records_and_text_are_separated() {
        let result = run(concat!(
            r#"echo '{"type":"log_message","levelname":"INFO","name":"borg.output.stats","message":"hi"}' >&2;"#,
            "echo 'plain text' >&2;",
            "echo out"
        ));
        assert_eq!(result.status, ExitKind::Success);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.stderr, "plain text\n");
        assert_eq!(result.stdout, b"out\n");
    }

    #[test]
    fn records_reach_callback_in_order() {
        let mut seen = Vec::new();
        run_invocation(
            &shell(concat!(
                r#"echo '{"type":"log_message","name":"borg.output.list","message":"a"}' >&2;"#,
                r#"echo '{"type":"log_message","name":"borg.output.list","message":"b"}' >&2"#,
            )),
            &CancelToken::new(),
            DEFAULT_OUTPUT_LIMIT_BYTES,
            &mut |record| {
                if let BorgMessage::LogMessage { message, .. } = record {
                    seen.push(message.clone());
                }
            },
        )
        .expect("run");
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn split_records_are_joined() {
        let result = run(concat!(
            r#"printf '{"type":"log_message",\n"name":"borg.output.list","message":"x"}\n' >&2"#
        ));
        assert_eq!(result.records.len(), 1);
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn exit_codes_are_classified() {
        assert_eq!(run("exit 1").status, ExitKind::Warning);
        assert_eq!(run("exit 2").status, ExitKind::Failure(2));
        assert_eq!(run("kill -9 $$").status, ExitKind::Signal(9));
    }

    #[test]
    fn environment_is_added() {
        assert_eq!(run("echo $SYA_TEST").stdout, b"42\n");
    }

    #[test]
    fn failure_reason_prefers_error_records() {
        let result = run(concat!(
            r#"echo '{"type":"log_message","levelname":"ERROR","name":"borg.archiver","message":"Repository /x does not exist.","msgid":"Repository.DoesNotExist"}' >&2;"#,
            "echo 'trailing' >&2; exit 2"
        ));
        assert_eq!(
            result.failure_reason().as_deref(),
            Some("borg exited with code 2: Repository /x does not exist.")
        );
        assert_eq!(run("echo boom >&2; exit 2").failure_reason().as_deref(), Some("borg exited with code 2: boom"));
        assert_eq!(run("exit 1").failure_reason(), None);
    }

    #[test]
    fn stdout_is_bounded() {
        let result = run_invocation(
            &shell("printf 'abcdefghij'"),
            &CancelToken::new(),
            4,
            &mut |_| {},
        )
        .expect("run");
        assert_eq!(result.stdout, b"abcd");
        assert_eq!(result.stdout_truncated, 6);
    }

    #[test]
    fn missing_executable_is_not_found() {
        let mut invocation = shell("true");
        invocation.program = PathBuf::from("/nonexistent/borg");
        let err = run_invocation(
            &invocation,
            &CancelToken::new(),
            DEFAULT_OUTPUT_LIMIT_BYTES,
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[test]
    fn cancellation_kills_the_child() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let err = run_invocation(
            &shell("sleep 30"),
            &cancel,
            DEFAULT_OUTPUT_LIMIT_BYTES,
            &mut |_| {},
        )
        .unwrap_err();
        handle.join().expect("join");
        assert!(matches!(err, ProcessError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn dropping_the_stream_early_reaps_the_child() {
        let cancel = CancelToken::new();
        let started = Instant::now();
        let mut process = RunningProcess::spawn(
            &shell(r#"echo '{"type":"log_message","name":"borg.output.list","message":"a"}' >&2; sleep 30"#),
            &cancel,
            DEFAULT_OUTPUT_LIMIT_BYTES,
        )
        .expect("spawn");
        let first = process.records().next().expect("item").expect("record");
        assert!(matches!(first, StderrItem::Record(_)));
        drop(process);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
