//! Typed errors surfaced at component seams

use std::path::PathBuf;
use thiserror::Error;

use super::SessionId;

/// Errors produced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The child process could not be spawned
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Working directory for a command does not exist
    #[error("working directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    /// Generic I/O failure while talking to a child process
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request to a service failed
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// No backend script at the configured or default location
    #[error("backend script not found: {0}")]
    MissingScript(PathBuf),

    /// The service binary could not be located
    #[error("service binary `{0}` is not installed")]
    NotInstalled(String),

    /// No session with the given id
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

/// Result alias for the orchestration core
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
