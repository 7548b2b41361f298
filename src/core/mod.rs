//! Core application modules
//!
//! This module contains the shared plumbing of the orchestration core:
//! - Configuration management
//! - Event fan-out to the UI layer
//! - Identifiers and event payloads
//! - Session log buffering
//! - Platform capability table
//! - Typed errors

mod config;
mod error;
mod events;
mod log_buffer;
pub mod ipc;
pub mod platform;

pub use config::*;
pub use error::*;
pub use events::*;
pub use ipc::*;
pub use log_buffer::*;
pub use platform::{KillStrategy, Platform, QuoteStyle};
