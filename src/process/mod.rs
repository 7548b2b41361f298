//! Process management module
//!
//! This module handles spawning shell commands, streaming their output,
//! and tearing down process trees on timeout or cancellation.

mod executor;
mod stream;
mod types;
pub mod tree;

pub use executor::*;
pub use stream::read_lines;
pub use types::*;
