//! k4-core: Core abstractions and configuration for k4wd
//!
//! This crate provides the shared types, error taxonomy, Forwardfile
//! configuration, the traits of the orchestration engine's collaborators
//! (cluster API, tunnel provider, status sink), the shared shutdown signal and
//! the env file status sink.

pub mod cluster;
pub mod config;
pub mod envfile;
pub mod error;
pub mod shutdown;
pub mod time;
pub mod traits;
pub mod types;

pub use error::K4Error;
pub use shutdown::{Shutdown, ShutdownCause};
pub use types::{
    FailurePolicy, ForwardSpec, PortRef, ResolvedEndpoint, SessionState, StatusEntry,
    TargetSelector,
};
