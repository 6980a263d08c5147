//! Tunnel provider trait

use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Everything a provider needs to open one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    /// Forward name, for diagnostics
    pub name: String,
    pub context: Option<String>,
    pub namespace: String,
    pub bind_address: IpAddr,
    pub bind_port: u16,
    pub pod: String,
    pub remote_port: u16,
}

/// One-shot readiness notification handed to a provider.
///
/// Consumed on use, so readiness is reported at most once.
#[derive(Debug)]
pub struct ReadyNotifier(oneshot::Sender<()>);

impl ReadyNotifier {
    /// Create a notifier and the receiver that observes it
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Report that the tunnel accepts connections
    pub fn notify(self) {
        // The session may already be gone during shutdown
        let _ = self.0.send(());
    }
}

/// Byte transport for one forward.
///
/// `open` binds the local side, calls `ready.notify()` once it accepts connections
/// and then serves until `cancel` fires (return `Ok`) or the transport breaks
/// (return `Err`). It must return promptly after cancellation.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn open(
        &self,
        request: TunnelRequest,
        ready: ReadyNotifier,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;
}
