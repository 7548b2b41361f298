//! Backend process supervision
//!
//! One long-lived backend child with environment injection, output
//! forwarding and graceful-then-forced shutdown.

mod env;
mod supervisor;

pub use env::{assemble as assemble_env, backend_env, PASSTHROUGH_VARS, PROVIDER_VAR, SERVICE_PROVIDER};
pub use supervisor::BackendSupervisor;
