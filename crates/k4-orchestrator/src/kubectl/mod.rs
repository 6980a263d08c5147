//! Cluster access through the `kubectl` CLI
//!
//! Resource lookups parse `kubectl get ... -o json`; tunnels are
//! `kubectl port-forward` child processes.

mod cluster;
mod model;
mod tunnel;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

pub use cluster::KubectlCluster;
pub use tunnel::KubectlTunnel;

/// Default kubectl executable, looked up on `PATH`
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// How to invoke kubectl
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_KUBECTL),
            kubeconfig: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Command with the global flags for one context and namespace
    pub(crate) fn command(&self, context: Option<&str>, namespace: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("-n").arg(namespace).stdin(Stdio::null());
        cmd
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}
