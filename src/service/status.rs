//! Service status and its change-notifying holder

use std::sync::Mutex;

use crate::core::{EventHub, ServiceEvent};

/// Lifecycle state of the model service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    /// Binary could not be located
    NotInstalled,
    /// Binary found, service not answering
    Installed,
    /// Start requested, waiting for the health endpoint
    Starting,
    /// Health endpoint answers
    Running,
    /// Start failed
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::NotInstalled => "not installed",
            ServiceStatus::Installed => "installed",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of one controller plus the hub its changes go to.
///
/// Setting the status it already holds is a no-op, so subscribers never
/// see the same status twice in a row.
pub struct StatusCell {
    current: Mutex<ServiceStatus>,
    events: EventHub<ServiceEvent>,
}

impl StatusCell {
    pub fn new(initial: ServiceStatus, events: EventHub<ServiceEvent>) -> Self {
        Self {
            current: Mutex::new(initial),
            events,
        }
    }

    pub fn get(&self) -> ServiceStatus {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store `status`; returns whether it changed (and was broadcast)
    pub fn set(&self, status: ServiceStatus) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if *current == status {
            return false;
        }
        let previous = *current;
        tracing::info!(from = %previous, to = %status, "service status changed");
        *current = status;
        // Emitted under the lock so concurrent setters cannot reorder events
        self.events.emit(ServiceEvent::StatusChanged(status));
        true
    }
}
