//! k4-orchestrator: Tunnel orchestration engine for k4wd
//!
//! Resolves every configured forward to a pod and port, runs one session task
//! per forward, gates startup observation in a fixed order and applies the
//! strict or relaxed failure policy until all sessions have drained.
//!
//! The `kubectl` module provides the production cluster API and tunnel
//! provider; tests substitute their own implementations of the
//! `k4_core::traits` collaborators.

pub mod allocator;
pub mod kubectl;
pub mod orchestrator;
pub mod resolver;
pub mod session;
pub mod state;

pub use allocator::PortAllocator;
pub use orchestrator::{Orchestrator, RunSummary};
pub use resolver::TargetResolver;
pub use state::SessionContext;
