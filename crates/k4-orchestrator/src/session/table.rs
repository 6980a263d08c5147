//! Status table published to the status sink

use k4_core::types::{ForwardSpec, SessionState, StatusEntry};

use super::SessionEvent;

/// One entry per forward, in startup order.
///
/// Only the orchestrator's control task writes to it.
#[derive(Debug, Clone)]
pub struct StatusTable {
    entries: Vec<StatusEntry>,
}

impl StatusTable {
    /// All forwards inactive, with their configured bind addresses
    pub fn new(specs: &[ForwardSpec]) -> Self {
        Self {
            entries: specs.iter().map(StatusEntry::for_spec).collect(),
        }
    }

    /// Fold a session transition into the table.
    ///
    /// Returns `false` when the event names an unknown forward.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.name == event.name) else {
            return false;
        };

        entry.bind_address = event.bind_address;
        if event.bind_port != 0 {
            entry.bind_port = event.bind_port;
        }
        entry.active = matches!(event.state, SessionState::Ready | SessionState::Running);
        true
    }

    pub fn get(&self, name: &str) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    /// Number of forwards currently active
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }
}
