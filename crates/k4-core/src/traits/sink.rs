//! Status sink trait

use crate::error::SinkError;
use crate::types::StatusEntry;

/// Consumer of the published forward status.
///
/// `update` receives the full table on every change.
pub trait StatusSink: Send + Sync {
    /// Publish the current status table
    fn update(&self, entries: &[StatusEntry]) -> Result<(), SinkError>;

    /// Withdraw the published status
    fn remove(&self) -> Result<(), SinkError>;
}
