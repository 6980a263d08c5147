//! Forward session state machine
//!
//! ```text
//! Idle -> Resolving -> Ready -> Running -> Stopped
//!             |          |         |
//!             +----------+---------+----> Failed
//! ```
//!
//! Cancellation while resolving ends in `Stopped` as well. Every transition is
//! published on the session's watch channel and reported to the orchestrator.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use k4_core::error::{SessionError, TransportError};
use k4_core::traits::{ReadyNotifier, TunnelRequest};
use k4_core::types::{ForwardSpec, ResolvedEndpoint, SessionState};

use crate::state::SessionContext;

/// A session transition as reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub name: String,
    pub state: SessionState,
    pub bind_address: IpAddr,
    /// Local port, 0 until assigned
    pub bind_port: u16,
    pub endpoint: Option<ResolvedEndpoint>,
    /// Failure cause, set on `Failed`
    pub error: Option<String>,
}

/// One configured forward and its lifecycle for a single run
pub struct ForwardSession {
    spec: ForwardSpec,
    state: watch::Sender<SessionState>,
    events: mpsc::Sender<SessionEvent>,
    bind_port: u16,
    endpoint: Option<ResolvedEndpoint>,
}

impl ForwardSession {
    pub fn new(spec: ForwardSpec, events: mpsc::Sender<SessionEvent>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            bind_port: spec.bind_port,
            spec,
            state,
            events,
            endpoint: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes; stays readable after the session finished
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run the forward until it is cancelled or fails.
    ///
    /// Consumes the session: a finished session is never restarted.
    pub async fn run(
        mut self,
        ctx: Arc<SessionContext>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Resolving, None).await;

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            prepared = Self::prepare(&self.spec, &ctx) => Some(prepared),
        };

        let (endpoint, bind_port) = match prepared {
            None => {
                self.transition(SessionState::Stopped, None).await;
                return Ok(());
            }
            Some(Ok(prepared)) => prepared,
            Some(Err(e)) => return self.fail(e).await,
        };
        self.endpoint = Some(endpoint.clone());
        self.bind_port = bind_port;

        let request = TunnelRequest {
            name: self.spec.name.clone(),
            context: self.spec.context.clone(),
            namespace: self.spec.namespace.clone(),
            bind_address: self.spec.bind_address,
            bind_port,
            pod: endpoint.pod,
            remote_port: endpoint.port,
        };

        let (notifier, mut ready) = ReadyNotifier::channel();
        let tunnel = ctx.provider.open(request, notifier, cancel.clone());
        tokio::pin!(tunnel);

        let mut ready_seen = false;
        let result = loop {
            tokio::select! {
                result = &mut tunnel => break result,
                signal = &mut ready, if !ready_seen => {
                    ready_seen = true;
                    if signal.is_ok() {
                        self.mark_ready().await;
                    }
                }
            }
        };

        // Readiness reported right before the tunnel returned
        if !ready_seen && ready.try_recv().is_ok() {
            self.mark_ready().await;
        }

        if cancel.is_cancelled() {
            if let Err(e) = result {
                tracing::debug!(forward = %self.spec.name, "Tunnel error during shutdown: {}", e);
            }
            self.transition(SessionState::Stopped, None).await;
            return Ok(());
        }

        match result {
            Ok(()) => self.fail(TransportError::Closed.into()).await,
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn prepare(
        spec: &ForwardSpec,
        ctx: &SessionContext,
    ) -> Result<(ResolvedEndpoint, u16), SessionError> {
        let endpoint = ctx.resolver.resolve(spec).await?;
        let port = ctx
            .allocator
            .allocate(spec.bind_address, spec.bind_port)
            .await?;
        Ok((endpoint, port))
    }

    async fn mark_ready(&mut self) {
        self.transition(SessionState::Ready, None).await;
        self.transition(SessionState::Running, None).await;
    }

    async fn fail(&mut self, error: SessionError) -> Result<(), SessionError> {
        self.transition(SessionState::Failed, Some(error.to_string()))
            .await;
        Err(error)
    }

    async fn transition(&mut self, next: SessionState, error: Option<String>) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "invalid transition {} -> {}",
            current,
            next
        );
        self.state.send_replace(next);
        tracing::debug!(forward = %self.spec.name, "{} -> {}", current, next);

        let event = SessionEvent {
            name: self.spec.name.clone(),
            state: next,
            bind_address: self.spec.bind_address,
            bind_port: self.bind_port,
            endpoint: self.endpoint.clone(),
            error,
        };
        // The orchestrator outlives its sessions; a closed channel only happens in tests
        let _ = self.events.send(event).await;
    }
}
