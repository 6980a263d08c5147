//! Local port allocation
//!
//! Dynamic ports are found by binding port 0, reading back the port the OS
//! picked and releasing it again so the tunnel can bind it. Another process can
//! grab the port in between; for a developer tool that window is accepted.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use tokio::net::TcpListener;

use k4_core::error::TransportError;

/// Attempts at finding a port not yet handed out in this run
const MAX_ATTEMPTS: usize = 16;

/// Hands out local ports for one run
#[derive(Debug, Default)]
pub struct PortAllocator {
    /// Every `(address, port)` handed out so far
    issued: Mutex<HashSet<(IpAddr, u16)>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `configured` unchanged, or an ephemeral port when it is 0.
    /// A pair already handed out in this run is never returned twice.
    pub async fn allocate(&self, address: IpAddr, configured: u16) -> Result<u16, TransportError> {
        let bind_error = |source: io::Error| TransportError::Bind {
            address: SocketAddr::new(address, configured).to_string(),
            source,
        };

        if configured != 0 {
            if !self.record(address, configured) {
                return Err(bind_error(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "port already handed out in this run",
                )));
            }
            return Ok(configured);
        }

        for _ in 0..MAX_ATTEMPTS {
            let listener = TcpListener::bind((address, 0)).await.map_err(bind_error)?;
            let port = listener.local_addr().map_err(bind_error)?.port();
            drop(listener);

            if self.record(address, port) {
                tracing::debug!("Allocated local port {}:{}", address, port);
                return Ok(port);
            }
            tracing::debug!("Port {} was already handed out in this run, retrying", port);
        }

        Err(bind_error(io::Error::new(
            io::ErrorKind::AddrInUse,
            "no unused ephemeral port found",
        )))
    }

    fn record(&self, address: IpAddr, port: u16) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((address, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_configured_port_is_returned_unchanged() {
        let allocator = PortAllocator::new();
        assert_eq!(allocator.allocate(LOOPBACK, 8080).await.unwrap(), 8080);
    }

    #[tokio::test]
    async fn test_dynamic_port_is_nonzero_and_bindable() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate(LOOPBACK, 0).await.unwrap();
        assert_ne!(port, 0);

        // Released again, so the tunnel can claim it
        TcpListener::bind((LOOPBACK, port)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dynamic_ports_are_unique_within_a_run() {
        let allocator = PortAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..20 {
            let port = allocator.allocate(LOOPBACK, 0).await.unwrap();
            assert!(seen.insert(port), "port {} handed out twice", port);
        }
    }

    #[tokio::test]
    async fn test_configured_port_taken_by_dynamic_allocation_fails() {
        let allocator = PortAllocator::new();
        let dynamic = allocator.allocate(LOOPBACK, 0).await.unwrap();

        let err = allocator.allocate(LOOPBACK, dynamic).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Bind { ref source, .. } if source.kind() == io::ErrorKind::AddrInUse
        ));

        // Same port on another address is a different pair
        let other = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2));
        assert_eq!(allocator.allocate(other, dynamic).await.unwrap(), dynamic);
    }

    #[tokio::test]
    async fn test_configured_port_is_issued_once() {
        let allocator = PortAllocator::new();
        allocator.allocate(LOOPBACK, 8080).await.unwrap();
        assert!(allocator.allocate(LOOPBACK, 8080).await.is_err());
    }

    #[tokio::test]
    async fn test_unbindable_address_fails() {
        let allocator = PortAllocator::new();
        // TEST-NET-1, never assigned to a local interface
        let err = allocator
            .allocate(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
