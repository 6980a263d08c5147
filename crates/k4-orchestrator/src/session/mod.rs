//! Forward sessions and the status table they feed

mod forward;
mod table;

pub use forward::{ForwardSession, SessionEvent};
pub use table::StatusTable;
