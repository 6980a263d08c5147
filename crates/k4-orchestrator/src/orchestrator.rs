//! Run orchestration
//!
//! The orchestrator launches one task per forward, then walks the forwards in
//! startup order and waits for each one to settle before looking at the next.
//! Sessions still start concurrently; only the observation is sequential, which
//! keeps startup logs in a stable order and surfaces an early misconfiguration
//! first.
//!
//! Afterwards it keeps folding session transitions into the status table until
//! every session has exited. Under the strict policy the first failure fires the
//! shared shutdown signal. A status sink failure always does.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use k4_core::error::{K4Error, SessionError, SinkError};
use k4_core::traits::StatusSink;
use k4_core::types::{FailurePolicy, ForwardSpec, SessionState};
use k4_core::{Shutdown, ShutdownCause};

use crate::session::{ForwardSession, SessionEvent, StatusTable};
use crate::state::SessionContext;

/// Pending transitions buffered between the sessions and the control task
const EVENT_BUFFER: usize = 64;

/// Final state of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Last state of every forward, in startup order
    pub states: Vec<(String, SessionState)>,
    /// State each forward had settled in when startup reached it, in the order
    /// startup was reported
    pub startup: Vec<(String, SessionState)>,
    /// What fired the shutdown signal, if anything did
    pub cause: Option<ShutdownCause>,
}

impl RunSummary {
    pub fn state(&self, name: &str) -> Option<SessionState> {
        self.states
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, state)| *state)
    }

    /// Whether any forward ended in `Failed`
    pub fn has_failures(&self) -> bool {
        self.states
            .iter()
            .any(|(_, state)| *state == SessionState::Failed)
    }
}

/// Owns the forwards of one run
pub struct Orchestrator {
    specs: Vec<ForwardSpec>,
    policy: FailurePolicy,
    ctx: Arc<SessionContext>,
    sink: Arc<dyn StatusSink>,
    shutdown: Shutdown,
}

impl Orchestrator {
    /// `specs` must already be in startup order
    pub fn new(
        specs: Vec<ForwardSpec>,
        policy: FailurePolicy,
        ctx: Arc<SessionContext>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            specs,
            policy,
            ctx,
            sink,
            shutdown: Shutdown::new(),
        }
    }

    /// Use an existing shutdown signal instead of a fresh one
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle for stopping the run from outside, e.g. on SIGINT
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run every forward until all of them have exited.
    ///
    /// Fails only when the status sink fails; forward failures are reported in
    /// the returned summary.
    pub async fn run(self) -> Result<RunSummary, K4Error> {
        let mut control = Control {
            table: StatusTable::new(&self.specs),
            latest: HashMap::new(),
            policy: self.policy,
            sink: self.sink,
            shutdown: self.shutdown.clone(),
            sink_error: None,
        };

        // Nothing has started yet, so there is nothing to drain
        control.sink.update(control.table.entries())?;

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
        let mut handles = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let session = ForwardSession::new(spec.clone(), event_tx.clone());
            let ctx = self.ctx.clone();
            let cancel = self.shutdown.token();
            handles.push((
                spec.name.clone(),
                tokio::spawn(async move { session.run(ctx, cancel).await }),
            ));
        }
        // The channel closes once every session has dropped its sender
        drop(event_tx);

        tracing::info!(
            "Starting {} forward(s) ({:?} policy)",
            self.specs.len(),
            self.policy
        );

        let mut startup = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            while !control.state(&spec.name).is_settled() {
                match event_rx.recv().await {
                    Some(event) => control.apply(event),
                    None => break,
                }
            }
            control.report_startup(spec);
            startup.push((spec.name.clone(), control.state(&spec.name)));
        }
        tracing::info!(
            "{} of {} forward(s) active",
            control.table.active_count(),
            self.specs.len()
        );

        while let Some(event) = event_rx.recv().await {
            control.apply(event);
        }

        drain(handles).await;

        if let Some(e) = control.sink_error {
            return Err(e.into());
        }

        let states = self
            .specs
            .iter()
            .map(|spec| (spec.name.clone(), control.state(&spec.name)))
            .collect();
        Ok(RunSummary {
            states,
            startup,
            cause: self.shutdown.cause(),
        })
    }
}

/// State owned by the orchestrator's control task
struct Control {
    table: StatusTable,
    latest: HashMap<String, SessionEvent>,
    policy: FailurePolicy,
    sink: Arc<dyn StatusSink>,
    shutdown: Shutdown,
    sink_error: Option<SinkError>,
}

impl Control {
    fn state(&self, name: &str) -> SessionState {
        self.latest
            .get(name)
            .map(|event| event.state)
            .unwrap_or(SessionState::Idle)
    }

    fn apply(&mut self, event: SessionEvent) {
        if !self.table.apply(&event) {
            tracing::warn!("Transition for unknown forward '{}'", event.name);
            return;
        }

        if event.state == SessionState::Failed {
            self.on_failure(&event);
        }

        self.latest.insert(event.name.clone(), event);
        self.publish();
    }

    fn on_failure(&self, event: &SessionEvent) {
        let reason = event.error.as_deref().unwrap_or("unknown error");
        match self.policy {
            FailurePolicy::Relaxed => {
                tracing::warn!("Forward '{}' failed: {}", event.name, reason);
            }
            FailurePolicy::Strict => {
                if self
                    .shutdown
                    .trigger(ShutdownCause::ForwardFailed(event.name.clone()))
                {
                    tracing::error!("Forward '{}' failed: {}", event.name, reason);
                } else {
                    tracing::warn!(
                        "Forward '{}' failed during shutdown: {}",
                        event.name,
                        reason
                    );
                }
            }
        }
    }

    fn publish(&mut self) {
        if self.sink_error.is_some() {
            return;
        }
        if let Err(e) = self.sink.update(self.table.entries()) {
            tracing::error!("Failed to publish forward status: {}", e);
            self.shutdown.trigger(ShutdownCause::SinkFailed);
            self.sink_error = Some(e);
        }
    }

    fn report_startup(&self, spec: &ForwardSpec) {
        let Some(event) = self.latest.get(&spec.name) else {
            tracing::warn!("Forward '{}' exited before reporting", spec.name);
            return;
        };

        match (event.state, &event.endpoint) {
            (SessionState::Ready | SessionState::Running, Some(endpoint)) => {
                let address = self
                    .table
                    .get(&spec.name)
                    .map(|entry| entry.address())
                    .unwrap_or_default();
                tracing::info!(
                    "Forwarding {} -> {}/{}:{} ({})",
                    address,
                    spec.namespace,
                    endpoint.pod,
                    endpoint.port,
                    spec.name
                );
            }
            (SessionState::Failed, _) => {
                tracing::info!(
                    "Forward '{}' did not start: {}",
                    spec.name,
                    event.error.as_deref().unwrap_or("unknown error")
                );
            }
            (state, _) => {
                tracing::debug!("Forward '{}' settled as {}", spec.name, state);
            }
        }
    }
}

/// Wait for every session task to exit
async fn drain(handles: Vec<(String, JoinHandle<Result<(), SessionError>>)>) {
    let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    for (name, result) in names.iter().zip(join_all(handles).await) {
        match result {
            Ok(Ok(())) => tracing::debug!("Forward '{}' exited", name),
            Ok(Err(e)) => tracing::debug!("Forward '{}' exited with error: {}", name, e),
            Err(e) => tracing::error!("Forward task '{}' panicked: {}", name, e),
        }
    }
    tracing::debug!("All forwards drained");
}
