//! Runner abstraction for borg invocations.
//!
//! The [`CommandRunner`] trait decouples orchestration from actually spawning
//! borg. Tests use scripted runners that return predetermined results
//! without spawning processes.

use tracing::{info, instrument};

use crate::core::invocation::Invocation;
use crate::core::messages::BorgMessage;
use crate::error::ProcessError;
use crate::io::process::{
    CancelToken, DEFAULT_OUTPUT_LIMIT_BYTES, ExternalCommandResult, run_invocation,
};

/// Abstraction over how invocations are executed.
pub trait CommandRunner {
    /// Run `invocation`, handing each borg record to `on_record` as it arrives.
    fn run(
        &self,
        invocation: &Invocation,
        on_record: &mut dyn FnMut(&BorgMessage),
    ) -> Result<ExternalCommandResult, ProcessError>;
}

/// Runner that spawns borg.
#[derive(Debug, Clone)]
pub struct BorgRunner {
    cancel: CancelToken,
    output_limit_bytes: usize,
}

impl BorgRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl CommandRunner for BorgRunner {
    #[instrument(skip_all)]
    fn run(
        &self,
        invocation: &Invocation,
        on_record: &mut dyn FnMut(&BorgMessage),
    ) -> Result<ExternalCommandResult, ProcessError> {
        run_invocation(invocation, &self.cancel, self.output_limit_bytes, on_record)
    }
}

/// Runner for `--dry-run`: logs each command and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(
        &self,
        invocation: &Invocation,
        _on_record: &mut dyn FnMut(&BorgMessage),
    ) -> Result<ExternalCommandResult, ProcessError> {
        info!(command = %invocation.command_line(), "dry run, not running");
        Ok(ExternalCommandResult::success())
    }
}
