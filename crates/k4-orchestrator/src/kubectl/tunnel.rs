use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use k4_core::error::TransportError;
use k4_core::traits::{ReadyNotifier, TunnelProvider, TunnelRequest};

use super::Kubectl;

/// Prefix of the line kubectl prints once the local listener is up
const READY_PREFIX: &str = "Forwarding from";

/// `TunnelProvider` running one `kubectl port-forward` per forward
#[derive(Debug, Clone, Default)]
pub struct KubectlTunnel {
    kubectl: Kubectl,
}

impl KubectlTunnel {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

#[async_trait]
impl TunnelProvider for KubectlTunnel {
    async fn open(
        &self,
        request: TunnelRequest,
        ready: ReadyNotifier,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut cmd = self
            .kubectl
            .command(request.context.as_deref(), &request.namespace);
        cmd.arg("port-forward")
            .arg(format!("pod/{}", request.pod))
            .arg(format!("{}:{}", request.bind_port, request.remote_port))
            .arg("--address")
            .arg(request.bind_address.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(TransportError::Spawn)?;
        tracing::debug!(
            forward = %request.name,
            "Started port-forward to pod/{}:{} (pid {:?})",
            request.pod,
            request.remote_port,
            child.id()
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stderr not captured"))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut ready = Some(ready);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return stop(&mut child, &request.name).await,
                line = lines.next_line() => match line? {
                    Some(line) => {
                        tracing::debug!(forward = %request.name, "{}", line);
                        if line.starts_with(READY_PREFIX) {
                            if let Some(ready) = ready.take() {
                                ready.notify();
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return stop(&mut child, &request.name).await,
            status = child.wait() => status?,
        };
        let detail = stderr_task.await.unwrap_or_default();
        Err(TransportError::Exited {
            status: status.to_string(),
            detail: detail.trim().to_string(),
        })
    }
}

async fn stop(child: &mut Child, name: &str) -> Result<(), TransportError> {
    if let Err(e) = child.kill().await {
        // Already exited
        tracing::debug!(forward = %name, "Failed to kill port-forward: {}", e);
    }
    Ok(())
}
