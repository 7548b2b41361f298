//! Terminal sessions
//!
//! Named, independent command-execution contexts layered over the
//! command execution engine.

mod manager;
mod session;

pub use manager::*;
pub use session::*;
