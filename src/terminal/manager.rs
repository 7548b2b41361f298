//! Terminal session manager
//!
//! Owns the ordered list of sessions and the active-session pointer, and
//! forwards command runs to the execution engine. The session list lock is
//! only held for lookups; each session has its own lock, never held across
//! an await, so sessions run commands in parallel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::session::{next_name, resolve_cd_target, SessionSnapshot, TerminalSession};
use crate::core::{ExecEvent, LineKind, OrchestratorError, OrchestratorResult, SessionId, TerminalPreferences};
use crate::process::{CommandExecutor, CommandInvocation, CommandResult, Termination};

type SessionRef = Arc<Mutex<TerminalSession>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Manages independent terminal sessions
pub struct TerminalManager {
    executor: CommandExecutor,
    prefs: TerminalPreferences,
    sessions: Mutex<Vec<SessionRef>>,
    next_number: AtomicUsize,
}

impl TerminalManager {
    /// Create a manager with one active session
    pub fn new(executor: CommandExecutor, prefs: TerminalPreferences) -> Self {
        let manager = Self {
            executor,
            prefs,
            sessions: Mutex::new(Vec::new()),
            next_number: AtomicUsize::new(1),
        };
        manager.create_session();
        manager
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Open a new session and make it the active one
    pub fn create_session(&self) -> SessionId {
        let session = self.new_session();
        let id = lock(&session).id;

        lock(&self.sessions).push(session);
        self.set_active(id);
        debug!(%id, "session created");
        id
    }

    fn new_session(&self) -> SessionRef {
        let number = self.next_number.fetch_add(1, Ordering::Relaxed);
        let session = TerminalSession::new(
            Uuid::new_v4(),
            format!("Terminal {}", number),
            self.prefs.initial_cwd(),
            self.prefs.default_timeout(),
            self.prefs.log_buffer_size,
        );
        Arc::new(Mutex::new(session))
    }

    /// Make `id` the only active session; `false` if it does not exist
    pub fn set_active(&self, id: SessionId) -> bool {
        let sessions = lock(&self.sessions);
        if !sessions.iter().any(|s| lock(s).id == id) {
            return false;
        }

        for session in sessions.iter() {
            lock(session).active = false;
        }
        for session in sessions.iter() {
            let mut s = lock(session);
            if s.id == id {
                s.active = true;
            }
        }
        true
    }

    /// Close a session, cancelling anything it is running.
    ///
    /// Closing the last session opens a fresh one, and closing the active
    /// one activates its neighbour. Both happen under the same lock as the
    /// removal, so no caller ever sees an empty list or no active session.
    pub fn close(&self, id: SessionId) -> bool {
        let mut sessions = lock(&self.sessions);
        let Some(index) = sessions.iter().position(|s| lock(s).id == id) else {
            return false;
        };

        let removed = sessions.remove(index);
        let was_active = {
            let mut removed = lock(&removed);
            if let Some(cancel) = removed.cancel.take() {
                cancel.cancel();
            }
            removed.active
        };
        debug!(%id, "session closed");

        if sessions.is_empty() {
            let replacement = self.new_session();
            {
                let mut s = lock(&replacement);
                s.active = true;
                debug!(id = %s.id, "session created");
            }
            sessions.push(replacement);
        } else if was_active {
            lock(&sessions[index.min(sessions.len() - 1)]).active = true;
        }
        true
    }

    /// Ids of every session in display order
    pub fn session_ids(&self) -> Vec<SessionId> {
        lock(&self.sessions).iter().map(|s| lock(s).id).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Id of the active session
    pub fn active_id(&self) -> Option<SessionId> {
        lock(&self.sessions)
            .iter()
            .map(|s| lock(s))
            .find(|s| s.active)
            .map(|s| s.id)
    }

    /// Snapshot of one session
    pub fn session(&self, id: SessionId) -> Option<SessionSnapshot> {
        let session = self.get(id)?;
        let snapshot = lock(&session).snapshot();
        Some(snapshot)
    }

    /// Plain-text copy of a session's log
    pub fn transcript(&self, id: SessionId) -> Option<String> {
        let session = self.get(id)?;
        let text = lock(&session).log.transcript();
        Some(text)
    }

    /// Snapshot of one session, failing for an unknown id
    pub fn try_session(&self, id: SessionId) -> OrchestratorResult<SessionSnapshot> {
        self.session(id).ok_or(OrchestratorError::UnknownSession(id))
    }

    /// Activate the session after the active one, wrapping around
    pub fn next(&self) -> Option<SessionId> {
        self.cycle(1)
    }

    /// Activate the session before the active one, wrapping around
    pub fn previous(&self) -> Option<SessionId> {
        self.cycle(-1)
    }

    fn cycle(&self, step: isize) -> Option<SessionId> {
        let ids = self.session_ids();
        if ids.is_empty() {
            return None;
        }
        let current = self
            .active_id()
            .and_then(|id| ids.iter().position(|s| *s == id))
            .unwrap_or(0) as isize;
        let len = ids.len() as isize;
        let target = ids[(current + step).rem_euclid(len) as usize];
        self.set_active(target);
        Some(target)
    }

    /// Give a session the next name in the cycle
    pub fn rename(&self, id: SessionId) -> Option<String> {
        let session = self.get(id)?;
        let mut s = lock(&session);
        s.name = next_name(&s.name);
        Some(s.name.clone())
    }

    /// Store command text without running it
    pub fn set_pending(&self, id: SessionId, text: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                lock(&session).pending_command = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Run the pending command of a session, clearing it
    ///
    /// The text is taken before the run starts, so anything queued while
    /// the command runs stays pending.
    pub async fn execute_pending(&self, id: SessionId) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        let text = {
            let mut s = lock(&session);
            if s.busy {
                return false;
            }
            std::mem::take(&mut s.pending_command)
        };

        let started = self.execute_in_session(id, &text).await;
        if !started {
            let mut s = lock(&session);
            if s.pending_command.is_empty() {
                s.pending_command = text;
            }
        }
        started
    }

    /// Cancel the command in flight in a session
    pub fn cancel(&self, id: SessionId) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        let s = lock(&session);
        match &s.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a command in a session with its default timeout.
    ///
    /// Returns `false` without doing anything when the session is unknown,
    /// busy, or the command is blank.
    pub async fn execute_in_session(&self, id: SessionId, command: &str) -> bool {
        self.execute_in_session_with(id, command, None, None).await
    }

    /// Run a command with an explicit timeout and/or cancellation token
    pub async fn execute_in_session_with(
        &self,
        id: SessionId,
        command: &str,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        let Some(session) = self.get(id) else {
            return false;
        };

        let (cwd, timeout, token) = {
            let mut s = lock(&session);
            if s.busy {
                debug!(%id, "session busy, rejecting command");
                return false;
            }
            s.busy = true;
            s.push(LineKind::Command, &format!("$ {}", command));
            let token = cancel.unwrap_or_else(CancellationToken::new);
            s.cancel = Some(token.clone());
            (s.cwd.clone(), timeout.unwrap_or(s.timeout), token)
        };

        if !run_builtin(&session, command) {
            let invocation = CommandInvocation::new(command, cwd, timeout).with_cancel(token);
            self.run_external(&session, invocation).await;
        }

        let mut s = lock(&session);
        s.busy = false;
        s.cancel = None;
        true
    }

    async fn run_external(&self, session: &SessionRef, invocation: CommandInvocation) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ExecEvent>();

        let pump = async {
            while let Some(event) = rx.recv().await {
                let kind = if event.is_stderr() {
                    LineKind::Error
                } else {
                    LineKind::Output
                };
                lock(session).push(kind, event.line());
            }
        };

        let (result, ()) = tokio::join!(self.executor.execute(invocation, Some(tx)), pump);

        let mut s = lock(session);
        match result {
            Ok(result) => {
                if let Some(message) = failure_line(&result) {
                    s.push(LineKind::Error, &message);
                }
            }
            Err(e) => {
                warn!(session = %s.id, error = %e, "command failed to run");
                s.push(LineKind::Error, &e.to_string());
            }
        }
    }

    fn get(&self, id: SessionId) -> Option<SessionRef> {
        lock(&self.sessions)
            .iter()
            .find(|s| lock(s).id == id)
            .cloned()
    }
}

/// Characters that make a line more than a single simple command
const SHELL_OPERATORS: &[char] = &['&', ';', '|', '<', '>', '`', '(', ')', '\n'];

/// Commands that change session state instead of spawning a process
///
/// Lines that chain or redirect (`cd build && make`) go to the shell.
fn run_builtin(session: &SessionRef, command: &str) -> bool {
    if command.contains(SHELL_OPERATORS) {
        return false;
    }
    let mut parts = command.splitn(2, char::is_whitespace);
    let program = parts.next().unwrap_or_default();
    let arg = parts.next();

    let mut s = lock(session);
    match program {
        "cd" => {
            match resolve_cd_target(&s.cwd, arg) {
                Some(dir) => {
                    let message = format!("Working directory: {}", dir.display());
                    s.cwd = dir;
                    s.push(LineKind::Info, &message);
                }
                None => {
                    let message = format!("cd: no such directory: {}", arg.unwrap_or("~").trim());
                    s.push(LineKind::Error, &message);
                }
            }
            true
        }
        "clear" if arg.is_none() => {
            s.log.clear();
            true
        }
        _ => false,
    }
}

/// Summary line for a failed run that wrote to stderr
fn failure_line(result: &CommandResult) -> Option<String> {
    if result.success || result.stderr.trim().is_empty() {
        return None;
    }
    Some(match result.termination {
        Termination::TimedOut => format!("Timed out after {:.1}s", result.duration.as_secs_f64()),
        Termination::Cancelled => "Cancelled".to_string(),
        Termination::Exited => format!("Exited with code {}", result.exit_code),
    })
}
