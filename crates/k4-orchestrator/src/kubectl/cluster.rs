use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::process::Output;

use k4_core::cluster::{Deployment, LabelSelector, Pod, Service};
use k4_core::error::ResolutionError;
use k4_core::traits::ClusterApi;

use super::model::{DeploymentObject, List, PodObject, ServiceObject};
use super::Kubectl;

/// `ClusterApi` backed by `kubectl get`
#[derive(Debug, Clone, Default)]
pub struct KubectlCluster {
    kubectl: Kubectl,
}

impl KubectlCluster {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        context: Option<&str>,
        namespace: &str,
        args: &[&str],
    ) -> Result<Option<T>, ResolutionError> {
        let mut cmd = self.kubectl.command(context, namespace);
        cmd.arg("get").args(args).args(["-o", "json"]);
        tracing::trace!("Running {:?}", cmd.as_std());

        let output = cmd.output().await.map_err(|e| {
            ResolutionError::Cluster(format!(
                "failed to run {}: {}",
                self.kubectl.binary().display(),
                e
            ))
        })?;
        parse_output(&output)
    }
}

/// Decode kubectl's JSON output, mapping "not found" to `None`
fn parse_output<T: DeserializeOwned>(output: &Output) -> Result<Option<T>, ResolutionError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("(NotFound)") {
            return Ok(None);
        }
        return Err(ResolutionError::Cluster(stderr.trim().to_string()));
    }

    serde_json::from_slice(&output.stdout)
        .map(Some)
        .map_err(|e| ResolutionError::Cluster(format!("unexpected kubectl output: {}", e)))
}

#[async_trait]
impl ClusterApi for KubectlCluster {
    async fn pod(
        &self,
        context: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Pod>, ResolutionError> {
        let pod: Option<PodObject> = self.get(context, namespace, &["pod", name]).await?;
        Ok(pod.map(Pod::from))
    }

    async fn service(
        &self,
        context: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ResolutionError> {
        let service: Option<ServiceObject> =
            self.get(context, namespace, &["service", name]).await?;
        Ok(service.map(Service::from))
    }

    async fn deployment(
        &self,
        context: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ResolutionError> {
        let deployment: Option<DeploymentObject> =
            self.get(context, namespace, &["deployment", name]).await?;
        Ok(deployment.map(Deployment::from))
    }

    async fn pods_matching(
        &self,
        context: Option<&str>,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, ResolutionError> {
        let selector = selector.to_string();
        let list: Option<List<PodObject>> = self
            .get(context, namespace, &["pods", "-l", &selector])
            .await?;
        Ok(list
            .map(|l| l.items.into_iter().map(Pod::from).collect())
            .unwrap_or_default())
    }
}
