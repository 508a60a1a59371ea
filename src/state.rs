//! Container lifecycle state owned by the supervisor.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Lifecycle status of a provisioned container.
///
/// Legal transitions: `Created -> Pulling -> Starting -> Running -> Stopping
/// -> Stopped`, plus `Failed` from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Slot opened, nothing requested from the engine yet.
    Created,
    /// Image pull in progress.
    Pulling,
    /// Container being created and started.
    Starting,
    /// Engine reports the container running.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Stopped and removed (terminal).
    Stopped,
    /// Provisioning or the container itself failed (terminal).
    Failed,
}

impl ContainerStatus {
    /// Human-readable status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Pulling => "pulling",
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopping => "stopping",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Failed => "failed",
        }
    }

    /// Whether this status has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerStatus::Stopped | ContainerStatus::Failed)
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_advance_to(self, next: ContainerStatus) -> bool {
        use ContainerStatus::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Created, Pulling)
                | (Pulling, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable record of one provisioned container.
///
/// Owned by the supervisor and only ever mutated under its per-slot lock.
#[derive(Debug)]
pub struct ContainerState {
    id: Option<String>,
    status: ContainerStatus,
    host: String,
    host_bindings: BTreeMap<u16, u16>,
    started_at: Option<Instant>,
    last_error: Option<String>,
}

impl ContainerState {
    pub(crate) fn new(host: impl Into<String>) -> Self {
        Self {
            id: None,
            status: ContainerStatus::Created,
            host: host.into(),
            host_bindings: BTreeMap::new(),
            started_at: None,
            last_error: None,
        }
    }

    /// Advance to `next` if the transition table allows it.
    ///
    /// Returns false (and leaves the state untouched) on an illegal edge;
    /// the single-flight gate means that only ever indicates a bug.
    pub(crate) fn advance(&mut self, next: ContainerStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::error!(
                "refused illegal container state transition {} -> {} (id: {})",
                self.status,
                next,
                self.id.as_deref().unwrap_or("-"),
            );
            return false;
        }
        tracing::info!(
            "container state {} -> {} (id: {})",
            self.status,
            next,
            self.id.as_deref().unwrap_or("-"),
        );
        if next == ContainerStatus::Running {
            self.started_at = Some(Instant::now());
        }
        self.status = next;
        true
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    pub(crate) fn set_bindings(&mut self, bindings: BTreeMap<u16, u16>) {
        self.host_bindings = bindings;
    }

    pub(crate) fn record_error(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }

    /// Engine-assigned container id, once created.
    pub fn container_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ContainerStatus {
        self.status
    }

    /// Host address the container's ports are published on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Engine-assigned port bindings, container port to host port.
    pub fn bindings(&self) -> &BTreeMap<u16, u16> {
        &self.host_bindings
    }

    /// When the container was observed running.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// The most recent recorded failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = ContainerState::new("127.0.0.1");
        for next in [
            ContainerStatus::Pulling,
            ContainerStatus::Starting,
            ContainerStatus::Running,
            ContainerStatus::Stopping,
            ContainerStatus::Stopped,
        ] {
            assert!(state.advance(next), "expected {next} to be legal");
        }
        assert!(state.status().is_terminal());
    }

    #[test]
    fn test_illegal_transitions_refused() {
        let mut state = ContainerState::new("127.0.0.1");
        assert!(!state.advance(ContainerStatus::Running));
        assert_eq!(state.status(), ContainerStatus::Created);

        assert!(state.advance(ContainerStatus::Pulling));
        assert!(!state.advance(ContainerStatus::Stopped));
        assert_eq!(state.status(), ContainerStatus::Pulling);
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for status in [
            ContainerStatus::Created,
            ContainerStatus::Pulling,
            ContainerStatus::Starting,
            ContainerStatus::Running,
            ContainerStatus::Stopping,
        ] {
            assert!(status.can_advance_to(ContainerStatus::Failed));
        }
        assert!(!ContainerStatus::Stopped.can_advance_to(ContainerStatus::Failed));
        assert!(!ContainerStatus::Failed.can_advance_to(ContainerStatus::Failed));
    }

    #[test]
    fn test_running_stamps_started_at() {
        let mut state = ContainerState::new("127.0.0.1");
        state.advance(ContainerStatus::Pulling);
        state.advance(ContainerStatus::Starting);
        assert!(state.started_at().is_none());
        state.advance(ContainerStatus::Running);
        assert!(state.started_at().is_some());
    }
}
