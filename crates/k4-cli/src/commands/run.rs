//! Run command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use k4_core::config;
use k4_core::envfile::Envfile;
use k4_core::traits::StatusSink;
use k4_core::{SessionState, Shutdown, ShutdownCause};
use k4_orchestrator::kubectl::{Kubectl, KubectlCluster, KubectlTunnel};
use k4_orchestrator::{Orchestrator, SessionContext, TargetResolver};

use crate::output::print_warning;

/// Run every forward of `forwardfile` until interrupted or, under the strict
/// policy, until the first forward fails
pub async fn run_command(forwardfile: &Path, kubectl: Kubectl) -> Result<()> {
    let config = config::load_config(forwardfile)
        .with_context(|| format!("Failed to load {}", forwardfile.display()))?;
    tracing::info!(
        "Loaded {} (relaxed={}) containing {} entries: ({})",
        config.path.display(),
        config.relaxed,
        config.forwards.len(),
        config.names().join(", ")
    );

    let envfile = Arc::new(Envfile::new(forwardfile).context("Failed to initialize env file")?);
    tracing::info!("Initialized env file {}", envfile.path().display());

    let resolver = TargetResolver::new(Arc::new(KubectlCluster::new(kubectl.clone())))
        .with_backend_timeout(config.backend_timeout);
    let ctx = Arc::new(SessionContext::new(
        resolver,
        Arc::new(KubectlTunnel::new(kubectl)),
    ));
    let orchestrator = Orchestrator::new(
        config.forwards.clone(),
        config.policy(),
        ctx,
        envfile.clone(),
    );

    let signals = tokio::spawn(wait_for_termination(orchestrator.shutdown()));
    let result = orchestrator.run().await;
    signals.abort();

    tracing::info!("Removing {}", envfile.path().display());
    let removed = envfile.remove();

    let summary = result?;
    removed.context("Failed to remove env file")?;

    if let Some(ShutdownCause::ForwardFailed(name)) = &summary.cause {
        anyhow::bail!("Forward '{}' failed, stopped all forwards", name);
    }

    let failed: Vec<&str> = summary
        .states
        .iter()
        .filter(|(_, state)| *state == SessionState::Failed)
        .map(|(name, _)| name.as_str())
        .collect();
    if !failed.is_empty() {
        print_warning(&format!("Failed forwards: {}", failed.join(", ")));
    }

    tracing::info!("No active forwards left, exiting");
    Ok(())
}

/// Fire `shutdown` on SIGINT or SIGTERM
async fn wait_for_termination(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Received Ctrl+C, stopping all forwards"),
        _ = terminate => tracing::warn!("Received SIGTERM, stopping all forwards"),
    }

    shutdown.trigger(ShutdownCause::Interrupt);
}
