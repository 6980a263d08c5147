//! Cluster API trait

use async_trait::async_trait;

use crate::cluster::{Deployment, LabelSelector, Pod, Service};
use crate::error::ResolutionError;

/// Read access to the cluster resources a forward can target.
///
/// Lookups return `Ok(None)` for resources that do not exist; `Err` is reserved
/// for failures of the API itself.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a pod by name
    async fn pod(
        &self,
        context: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Pod>, ResolutionError>;

    /// Get a service by name
    async fn service(
        &self,
        context: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ResolutionError>;

    /// Get a deployment by name
    async fn deployment(
        &self,
        context: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ResolutionError>;

    /// List pods matching a label selector
    async fn pods_matching(
        &self,
        context: Option<&str>,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, ResolutionError>;
}
