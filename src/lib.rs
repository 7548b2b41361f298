//! loclm - process orchestration core of the LocLM desktop client
//!
//! Runs shell commands for terminal sessions, manages the local model
//! service and supervises the application backend. Everything a UI needs
//! arrives as events on per-component hubs.

// Config, events, platform table, errors
pub mod core;
// Command execution engine
pub mod process;
// Terminal sessions
pub mod terminal;
// Model service lifecycle
pub mod service;
// Backend supervision
pub mod backend;

pub use crate::backend::BackendSupervisor;
pub use crate::core::{Config, OrchestratorError, OrchestratorResult};
pub use crate::process::{CommandExecutor, CommandInvocation, CommandResult};
pub use crate::service::{ServiceController, ServiceStatus};
pub use crate::terminal::TerminalManager;
