//! Model service lifecycle
//!
//! Install discovery, start and health polling of the local model service,
//! asset listing and downloads with progress, and a background monitor.

mod assets;
mod client;
mod controller;
pub(crate) mod discovery;
#[cfg(test)]
pub(crate) mod mock;
mod progress;
mod status;

pub use assets::{asset_matches, parse_tags, Asset};
pub use client::{PullOutcome, ServiceClient};
pub use controller::ServiceController;
pub use discovery::{candidates, locate, probe};
pub use progress::{NdjsonDecoder, PullMessage, PullProgress, SUCCESS_STATUS};
pub use status::{ServiceStatus, StatusCell};
