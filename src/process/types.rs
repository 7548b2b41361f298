//! Command invocation and result types

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit code reported for a command killed after a timeout or cancellation.
///
/// Unix codes are 0-255 and processes killed by a foreign signal are
/// reported as `128 + signal`. Windows codes span the whole `u32` range, and
/// `-1` (`0xFFFFFFFF`) is a real one there, so the sentinel sits at the far
/// end instead. `CommandResult::termination` is the authoritative record of
/// why a run ended.
pub const TIMEOUT_EXIT_CODE: i32 = i32::MIN;

/// One shell command run
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    /// Command text handed to the shell
    pub command: String,
    /// Directory the shell starts in
    pub working_dir: PathBuf,
    /// Hard limit on the run time
    pub timeout: Duration,
    /// External cancellation signal
    pub cancel: Option<CancellationToken>,
}

impl CommandInvocation {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            timeout,
            cancel: None,
        }
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// How a command run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own
    Exited,
    /// The timeout fired first and the process tree was killed
    TimedOut,
    /// The cancellation signal fired first and the process tree was killed
    Cancelled,
}

/// Outcome of a command run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Process exit code, or `TIMEOUT_EXIT_CODE`
    pub exit_code: i32,
    /// `exit_code == 0`
    pub success: bool,
    /// Which event ended the run
    pub termination: Termination,
    /// Wall time from spawn to completion
    pub duration: Duration,
}

impl CommandResult {
    pub(crate) fn exited(stdout: String, stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
            termination: Termination::Exited,
            duration,
        }
    }

    pub(crate) fn killed(
        stdout: String,
        stderr: String,
        termination: Termination,
        duration: Duration,
    ) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: TIMEOUT_EXIT_CODE,
            success: false,
            termination,
            duration,
        }
    }

    /// Whether the run was cut short by the timeout
    pub fn timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }
}

/// Numeric exit code of a finished process
///
/// On Unix a process killed by a signal has no code; it is reported the way
/// shells do, as `128 + signal`.
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_not_a_common_exit_code() {
        assert!(!(0..=255).contains(&TIMEOUT_EXIT_CODE));
        // Windows processes exit with -1 (0xFFFFFFFF) routinely
        assert_ne!(TIMEOUT_EXIT_CODE, -1);
    }

    #[test]
    fn test_killed_result_records_termination() {
        let result = CommandResult::killed(String::new(), String::new(), Termination::Cancelled, Duration::ZERO);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!result.success);
        assert!(!result.timed_out());
        assert_eq!(result.termination, Termination::Cancelled);
    }
}
