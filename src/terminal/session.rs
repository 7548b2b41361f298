//! Terminal session state

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::{LineKind, LogBuffer, LogLine, SessionId};

/// Names a session cycles through on rename
pub const NAME_CYCLE: &[&str] = &["Terminal", "Build", "Server", "Tests", "Git", "Scratch"];

/// One independent command-execution context
#[derive(Debug)]
pub struct TerminalSession {
    /// Unique identifier
    pub id: SessionId,
    /// Display name
    pub name: String,
    /// Directory commands run in
    pub cwd: PathBuf,
    /// Whether this is the focused session
    pub active: bool,
    /// Whether a command is in flight
    pub busy: bool,
    /// Command text typed but not yet run
    pub pending_command: String,
    /// Default per-command timeout
    pub timeout: Duration,
    /// Lines emitted in this session
    pub log: LogBuffer,
    /// Cancels the in-flight command
    pub(crate) cancel: Option<CancellationToken>,
}

impl TerminalSession {
    pub fn new(id: SessionId, name: String, cwd: PathBuf, timeout: Duration, log_lines: usize) -> Self {
        Self {
            id,
            name,
            cwd,
            active: false,
            busy: false,
            pending_command: String::new(),
            timeout,
            log: LogBuffer::new(log_lines),
            cancel: None,
        }
    }

    pub fn push(&mut self, kind: LineKind, content: &str) {
        self.log.push_line(content, kind);
    }

    /// Copy of the session state for display
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            name: self.name.clone(),
            cwd: self.cwd.clone(),
            active: self.active,
            busy: self.busy,
            pending_command: self.pending_command.clone(),
            lines: self.log.lines().cloned().collect(),
        }
    }
}

/// Read-only copy of a session handed to the UI
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    pub cwd: PathBuf,
    pub active: bool,
    pub busy: bool,
    pub pending_command: String,
    pub lines: Vec<LogLine>,
}

impl SessionSnapshot {
    /// Contents of every line of the given kind
    pub fn contents(&self, kind: LineKind) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| l.content.as_str())
            .collect()
    }
}

/// Next name in `NAME_CYCLE`, keyed off the prefix of `current`.
///
/// A trailing number is kept: "Terminal 2" becomes "Build 2". Names whose
/// prefix is not in the cycle restart at the first entry.
pub fn next_name(current: &str) -> String {
    let (prefix, suffix) = match current.rsplit_once(' ') {
        Some((prefix, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) && !suffix.is_empty() => {
            (prefix, Some(suffix))
        }
        _ => (current, None),
    };

    let next = match NAME_CYCLE.iter().position(|n| *n == prefix) {
        Some(i) => NAME_CYCLE[(i + 1) % NAME_CYCLE.len()],
        None => NAME_CYCLE[0],
    };

    match suffix {
        Some(n) => format!("{} {}", next, n),
        None => next.to_string(),
    }
}

/// Resolve the argument of `cd` against the session directory
pub fn resolve_cd_target(cwd: &Path, arg: Option<&str>) -> Option<PathBuf> {
    let target = match arg.map(str::trim).filter(|a| !a.is_empty()) {
        None | Some("~") => dirs::home_dir()?,
        Some(arg) => {
            if let Some(rest) = arg.strip_prefix("~/") {
                dirs::home_dir()?.join(rest)
            } else {
                cwd.join(arg)
            }
        }
    };

    let target = target.canonicalize().ok()?;
    target.is_dir().then_some(target)
}
