//! Core error types for k4wd

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a k4wd run
#[derive(Error, Debug)]
pub enum K4Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Status sink error
    #[error("Status sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration-related errors. All of them abort before any session starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Forwardfile not found
    #[error("Forwardfile not found: {0}")]
    NotFound(PathBuf),

    /// Forwardfile could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A forward entry is invalid
    #[error("Invalid forward '{name}': {reason}")]
    InvalidForward { name: String, reason: String },

    /// The startup order is invalid
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Two forwards claim the same local address
    #[error("Forwards '{first}' and '{second}' both bind {address}")]
    DuplicateBinding {
        first: String,
        second: String,
        address: String,
    },
}

/// Failures turning a forward spec into a concrete pod and port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The referenced resource does not exist
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    /// No matching pod became ready within the wait bound
    #[error("No ready pod matching '{selector}' within {timeout:?}")]
    NoReadyBackend { selector: String, timeout: Duration },

    /// The remote port does not identify exactly one declared port
    #[error("Port '{port}' does not match exactly one port of {target}")]
    AmbiguousPort { port: String, target: String },

    /// The remote port is not stream oriented
    #[error("Port '{port}' of {target} uses unsupported protocol {protocol}")]
    UnsupportedProtocol {
        port: String,
        target: String,
        protocol: String,
    },

    /// The chosen pod is not in the Running phase
    #[error("Pod '{pod}' is not running (phase: {phase})")]
    NotRunning { pod: String, phase: String },

    /// The cluster API itself failed
    #[error("Cluster API error: {0}")]
    Cluster(String),
}

/// Tunnel transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// The local port could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The tunnel process could not be started
    #[error("Failed to start tunnel: {0}")]
    Spawn(#[source] std::io::Error),

    /// The tunnel exited without being asked to stop
    #[error("Tunnel exited unexpectedly ({status}): {detail}")]
    Exited { status: String, detail: String },

    /// The tunnel closed without reporting an error or being cancelled
    #[error("Tunnel closed unexpectedly")]
    Closed,

    /// I/O error while the tunnel was running
    #[error("Tunnel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single forward session failed
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Status sink failures. These are always fatal to the run.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing or removing the sink failed
    #[error("Status sink I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Status could not be serialized
    #[error("Status serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// There is no published status to read
    #[error("No env available at {0}")]
    Unavailable(PathBuf),
}
