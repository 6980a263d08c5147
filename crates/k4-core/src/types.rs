//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// Namespace used when a forward does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Bind address used when a forward does not name one
pub const DEFAULT_BIND_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// What remote resource a forward addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetSelector {
    /// A single pod by name
    Pod(String),
    /// A deployment, resolved through its label selector
    Deployment(String),
    /// A service, resolved through its selector and port mapping
    Service(String),
}

impl TargetSelector {
    /// Resource kind, as used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            TargetSelector::Pod(_) => "pod",
            TargetSelector::Deployment(_) => "deployment",
            TargetSelector::Service(_) => "service",
        }
    }

    /// Name of the referenced resource
    pub fn name(&self) -> &str {
        match self {
            TargetSelector::Pod(name)
            | TargetSelector::Deployment(name)
            | TargetSelector::Service(name) => name,
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

/// A port given either as a number or as a declared port name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

impl FromStr for PortRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("remote (named) port must be specified".to_string());
        }
        let digits = s.strip_prefix('-').unwrap_or(s);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return match s.parse::<u16>() {
                Ok(0) | Err(_) => Err(format!("port {} out of range", s)),
                Ok(port) => Ok(PortRef::Number(port)),
            };
        }
        Ok(PortRef::Name(s.to_string()))
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRef::Number(port) => write!(f, "{}", port),
            PortRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Immutable configuration for one forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    /// Unique key within a run
    pub name: String,
    /// Remote resource
    pub target: TargetSelector,
    /// Kubernetes namespace
    pub namespace: String,
    /// Remote port, numeric or named
    pub remote: PortRef,
    /// Local address to bind
    pub bind_address: IpAddr,
    /// Local port to bind (0 = assign dynamically)
    pub bind_port: u16,
    /// Alternate kube context
    pub context: Option<String>,
}

impl ForwardSpec {
    /// Create a spec with default namespace and a dynamic loopback binding
    pub fn new(name: impl Into<String>, target: TargetSelector, remote: PortRef) -> Self {
        Self {
            name: name.into(),
            target,
            namespace: DEFAULT_NAMESPACE.to_string(),
            remote,
            bind_address: DEFAULT_BIND_ADDRESS,
            bind_port: 0,
            context: None,
        }
    }

    /// Whether the local port is assigned at startup
    pub fn has_dynamic_port(&self) -> bool {
        self.bind_port == 0
    }
}

/// A concrete remote pod and numeric port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedEndpoint {
    pub pod: String,
    pub port: u16,
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pod, self.port)
    }
}

/// Forward session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, not yet started
    Idle,
    /// Resolving the target and preparing the tunnel
    Resolving,
    /// The tunnel accepts connections
    Ready,
    /// The tunnel is serving
    Running,
    /// Terminated by an error
    Failed,
    /// Terminated by cancellation
    Stopped,
}

impl SessionState {
    /// Whether the session has finished for this run
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Stopped)
    }

    /// Whether the session has left startup, successfully or not
    pub fn is_settled(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Resolving)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Ready)
                | (Resolving, Failed)
                | (Resolving, Stopped)
                | (Ready, Running)
                | (Ready, Failed)
                | (Ready, Stopped)
                | (Running, Failed)
                | (Running, Stopped)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Resolving => write!(f, "resolving"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Running => write!(f, "running"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Global partial-failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// The first failure stops every forward
    #[default]
    Strict,
    /// Failures only affect the failing forward
    Relaxed,
}

impl FailurePolicy {
    pub fn from_relaxed(relaxed: bool) -> Self {
        if relaxed {
            FailurePolicy::Relaxed
        } else {
            FailurePolicy::Strict
        }
    }
}

/// Published state of one forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub name: String,
    pub active: bool,
    pub bind_address: IpAddr,
    pub bind_port: u16,
}

impl StatusEntry {
    /// Initial (inactive) entry for a spec
    pub fn for_spec(spec: &ForwardSpec) -> Self {
        Self {
            name: spec.name.clone(),
            active: false,
            bind_address: spec.bind_address,
            bind_port: spec.bind_port,
        }
    }

    /// `address:port` as other processes should dial it
    pub fn address(&self) -> String {
        match self.bind_address {
            IpAddr::V4(addr) => format!("{}:{}", addr, self.bind_port),
            IpAddr::V6(addr) => format!("[{}]:{}", addr, self.bind_port),
        }
    }
}
