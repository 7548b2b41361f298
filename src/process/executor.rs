//! Command execution engine
//!
//! Runs one shell command to completion, timeout or cancellation while
//! streaming every output line to subscribers as it arrives.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::stream::read_lines;
use super::tree;
use super::types::{exit_code_of, CommandInvocation, CommandResult, Termination};
use crate::core::{EventHub, ExecEvent, OrchestratorError, OrchestratorResult, Platform, Subscription};

/// How long pipe readers may keep draining once the race is decided
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Stateless shell command runner
///
/// The only thing it keeps between invocations is its subscriber list.
#[derive(Clone, Default)]
pub struct CommandExecutor {
    events: EventHub<ExecEvent>,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for every output/error line of every invocation
    pub fn subscribe(&self) -> Subscription<ExecEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventHub<ExecEvent> {
        &self.events
    }

    /// Run a command, streaming lines to subscribers and to `sink` if given
    ///
    /// Returns an error only when the process could not be started. Timeouts
    /// and cancellation are reported through the result's exit code.
    pub async fn execute(
        &self,
        invocation: CommandInvocation,
        sink: Option<mpsc::UnboundedSender<ExecEvent>>,
    ) -> OrchestratorResult<CommandResult> {
        if !invocation.working_dir.is_dir() {
            return Err(OrchestratorError::MissingDirectory(invocation.working_dir));
        }

        let (program, args) = Platform::current().shell_invocation(&invocation.command);
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        tree::isolate(&mut cmd);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| OrchestratorError::Spawn { program, source })?;
        debug!(pid = ?child.id(), command = %invocation.command, "spawned command");

        let stdout = child
            .stdout
            .take()
            .map(|pipe| self.spawn_collector(pipe, false, sink.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| self.spawn_collector(pipe, true, sink));

        // A token nobody holds never fires
        let cancel = invocation.cancel.clone().unwrap_or_else(CancellationToken::new);

        let outcome = tokio::select! {
            biased;
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
        };

        if !matches!(outcome, Outcome::Exited(Ok(_))) {
            tree::kill_tree(&mut child).await;
        }

        let stdout = Collector::finish(stdout).await;
        let mut stderr = Collector::finish(stderr).await;
        let duration = started.elapsed();

        let result = match outcome {
            Outcome::Exited(Ok(status)) => {
                CommandResult::exited(stdout, stderr, exit_code_of(&status), duration)
            }
            Outcome::Exited(Err(e)) => {
                push_note(&mut stderr, &format!("Failed to wait for command: {}", e));
                CommandResult::killed(stdout, stderr, Termination::Cancelled, duration)
            }
            Outcome::TimedOut => {
                info!(command = %invocation.command, timeout = ?invocation.timeout, "command timed out");
                push_note(
                    &mut stderr,
                    &format!("Command timed out after {}", format_timeout(invocation.timeout)),
                );
                CommandResult::killed(stdout, stderr, Termination::TimedOut, duration)
            }
            Outcome::Cancelled => {
                info!(command = %invocation.command, "command cancelled");
                push_note(&mut stderr, "Command cancelled");
                CommandResult::killed(stdout, stderr, Termination::Cancelled, duration)
            }
        };

        Ok(result)
    }

    /// Convenience wrapper for a run without cancellation or per-call sink
    pub async fn run(
        &self,
        command: &str,
        working_dir: impl Into<std::path::PathBuf>,
        timeout: Duration,
    ) -> OrchestratorResult<CommandResult> {
        self.execute(CommandInvocation::new(command, working_dir, timeout), None)
            .await
    }

    /// Same as `run` but interruptible through `cancel`
    pub async fn run_cancellable(
        &self,
        command: &str,
        working_dir: impl Into<std::path::PathBuf>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> OrchestratorResult<CommandResult> {
        let invocation = CommandInvocation::new(command, working_dir, timeout).with_cancel(cancel);
        self.execute(invocation, None).await
    }

    fn spawn_collector<R>(
        &self,
        pipe: R,
        is_stderr: bool,
        sink: Option<mpsc::UnboundedSender<ExecEvent>>,
    ) -> Collector
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let events = self.events.clone();
        let shared = Arc::clone(&buffer);

        let task = tokio::spawn(async move {
            read_lines(pipe, |line| {
                if let Ok(mut buf) = shared.lock() {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                let event = if is_stderr {
                    ExecEvent::Error { line }
                } else {
                    ExecEvent::Output { line }
                };
                if let Some(sink) = &sink {
                    let _ = sink.send(event.clone());
                }
                events.emit(event);
            })
            .await;
        });

        Collector { buffer, task }
    }
}

/// Reader task plus the buffer it fills
struct Collector {
    buffer: Arc<Mutex<String>>,
    task: JoinHandle<()>,
}

impl Collector {
    /// Wait briefly for the reader to hit EOF, then take what it collected
    async fn finish(collector: Option<Collector>) -> String {
        let Some(Collector { buffer, mut task }) = collector else {
            return String::new();
        };

        if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
            debug!("pipe still open after process ended, detaching reader");
            task.abort();
        }

        let mut buf = buffer.lock().map(|mut b| std::mem::take(&mut *b)).unwrap_or_default();
        buf.shrink_to_fit();
        buf
    }
}

fn push_note(stderr: &mut String, note: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(note);
    stderr.push('\n');
}

fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::TIMEOUT_EXIT_CODE;
    use tempfile::tempdir;

    fn cwd() -> std::path::PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_echo_hello() {
        let executor = CommandExecutor::new();
        let result = executor
            .run("echo hello", cwd(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.success);
        assert!(result.stdout.contains("hello"));
        assert_eq!(result.termination, Termination::Exited);
    }

    #[tokio::test]
    async fn test_real_exit_code() {
        let executor = CommandExecutor::new();
        let result = executor
            .run("echo oops >&2; exit 3", cwd(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.success);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports_sentinel() {
        let executor = CommandExecutor::new();
        let started = Instant::now();
        let result = executor
            .run("sleep 10", cwd(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!(0..=255).contains(&result.exit_code));
        assert!(!result.success);
        assert!(result.timed_out());
        assert!(result.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let executor = CommandExecutor::new();
        let started = Instant::now();
        let result = executor
            .run("sleep 20 & sleep 20; wait", cwd(), Duration::from_millis(300))
            .await
            .unwrap();

        assert!(result.timed_out());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_cancellation_wins_race() {
        let executor = CommandExecutor::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = executor
            .run_cancellable("sleep 10", cwd(), Duration::from_secs(30), cancel)
            .await
            .unwrap();

        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.duration < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_streams_lines_in_order() {
        let executor = CommandExecutor::new();
        let mut sub = executor.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = executor
            .execute(
                CommandInvocation::new("echo a; echo b; echo c", cwd(), Duration::from_secs(5)),
                Some(tx),
            )
            .await
            .unwrap();
        assert!(result.success);

        let mut from_sink = Vec::new();
        while let Ok(event) = rx.try_recv() {
            from_sink.push(event.line().to_string());
        }
        assert_eq!(from_sink, vec!["a", "b", "c"]);

        let from_hub: Vec<_> = sub.drain().into_iter().map(|e| e.line().to_string()).collect();
        assert_eq!(from_hub, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_uses_working_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let executor = CommandExecutor::new();
        let result = executor
            .run("ls", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let executor = CommandExecutor::new();
        let err = executor
            .run("echo hi", "/definitely/not/here", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingDirectory(_)));
    }
}
