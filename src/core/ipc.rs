//! Identifiers and event payloads exchanged with the UI layer

use uuid::Uuid;

use crate::service::{PullProgress, ServiceStatus};

/// Unique identifier for a terminal session
pub type SessionId = Uuid;

/// Events emitted by the command execution engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// A line arrived on standard output
    Output { line: String },
    /// A line arrived on standard error
    Error { line: String },
}

impl ExecEvent {
    /// The line carried by this event
    pub fn line(&self) -> &str {
        match self {
            ExecEvent::Output { line } | ExecEvent::Error { line } => line,
        }
    }

    /// Whether the line came from standard error
    pub fn is_stderr(&self) -> bool {
        matches!(self, ExecEvent::Error { .. })
    }
}

/// Events emitted by the service lifecycle controller
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// The service moved to a new status
    StatusChanged(ServiceStatus),
    /// One progress snapshot of an asset download
    PullProgress(PullProgress),
}

/// Events emitted by the backend supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Backend wrote a line on standard output
    Log { line: String },
    /// Backend wrote a line on standard error
    Error { line: String },
    /// Backend exited without being asked to
    Exited { exit_code: Option<i32> },
}
