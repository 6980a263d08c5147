//! Collaborator traits used by the orchestration engine

mod cluster;
mod sink;
mod tunnel;

pub use cluster::ClusterApi;
pub use sink::StatusSink;
pub use tunnel::{ReadyNotifier, TunnelProvider, TunnelRequest};
