//! Shared dependencies of the forward sessions in one run

use std::sync::Arc;

use k4_core::traits::{ClusterApi, TunnelProvider};

use crate::allocator::PortAllocator;
use crate::resolver::TargetResolver;

/// Collaborators every session task works with.
///
/// Owned by the orchestrator and handed to each session task; nothing here is
/// process-global.
pub struct SessionContext {
    /// Target resolver
    pub resolver: TargetResolver,
    /// Local port allocator
    pub allocator: PortAllocator,
    /// Tunnel transport
    pub provider: Arc<dyn TunnelProvider>,
}

impl SessionContext {
    /// Create a context with a fresh allocator
    pub fn new(resolver: TargetResolver, provider: Arc<dyn TunnelProvider>) -> Self {
        Self {
            resolver,
            allocator: PortAllocator::new(),
            provider,
        }
    }

    /// Create a context resolving against `cluster` with default settings
    pub fn with_cluster(cluster: Arc<dyn ClusterApi>, provider: Arc<dyn TunnelProvider>) -> Self {
        Self::new(TargetResolver::new(cluster), provider)
    }
}
