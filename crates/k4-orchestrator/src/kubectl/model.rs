//! Subset of the Kubernetes JSON objects printed by `kubectl get -o json`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use k4_core::cluster::{
    ContainerPort, Deployment, LabelSelector, Pod, PodPhase, Protocol, SelectorOperator,
    SelectorRequirement, Service, ServicePort,
};
use k4_core::types::PortRef;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct List<T> {
    #[serde(default)]
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PodObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Container {
    #[serde(default)]
    pub ports: Vec<ContainerPortObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContainerPortObject {
    pub name: Option<String>,
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PodStatus {
    pub phase: Option<PodPhase>,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PodCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServiceSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<ServicePortObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServicePortObject {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: Option<IntOrString>,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum IntOrString {
    Int(i64),
    String(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeploymentObject {
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeploymentSpec {
    pub selector: DeploymentSelector,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeploymentSelector {
    #[serde(default, deserialize_with = "null_as_default")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub match_expressions: Vec<SelectorRequirementObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectorRequirementObject {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<String>,
}

/// Deserialize null as the default value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}

fn millis(time: Option<DateTime<Utc>>) -> u64 {
    time.map(|t| t.timestamp_millis().max(0) as u64)
        .unwrap_or_default()
}

impl From<PodObject> for Pod {
    fn from(pod: PodObject) -> Self {
        let ready_since = pod
            .status
            .conditions
            .iter()
            .find(|c| c.kind == "Ready" && c.status == "True")
            .map(|c| millis(c.last_transition_time));

        Pod {
            name: pod.metadata.name,
            phase: pod.status.phase.unwrap_or(PodPhase::Unknown),
            labels: pod.metadata.labels,
            ports: pod
                .spec
                .containers
                .into_iter()
                .flat_map(|c| c.ports)
                .map(|p| ContainerPort {
                    name: p.name,
                    port: p.container_port,
                    protocol: p.protocol,
                })
                .collect(),
            created_at: millis(pod.metadata.creation_timestamp),
            ready_since,
        }
    }
}

impl From<ServiceObject> for Service {
    fn from(service: ServiceObject) -> Self {
        Service {
            name: service.metadata.name,
            selector: LabelSelector::new(service.spec.selector),
            ports: service
                .spec
                .ports
                .into_iter()
                .map(|p| ServicePort {
                    name: p.name,
                    port: p.port,
                    target_port: p.target_port.and_then(IntOrString::into_port_ref),
                    protocol: p.protocol,
                })
                .collect(),
        }
    }
}

impl From<DeploymentObject> for Deployment {
    fn from(deployment: DeploymentObject) -> Self {
        let selector = deployment.spec.selector;
        Deployment {
            name: deployment.metadata.name,
            selector: LabelSelector::new(selector.match_labels).with_expressions(
                selector
                    .match_expressions
                    .into_iter()
                    .map(|r| SelectorRequirement {
                        key: r.key,
                        operator: r.operator,
                        values: r.values,
                    })
                    .collect(),
            ),
        }
    }
}

impl IntOrString {
    /// `None` for values that cannot name a port; the service port applies then
    fn into_port_ref(self) -> Option<PortRef> {
        match self {
            IntOrString::Int(n) => u16::try_from(n).ok().filter(|n| *n != 0).map(PortRef::Number),
            IntOrString::String(s) => s.parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_JSON: &str = r#"{
        "metadata": {
            "name": "web-7d9f",
            "labels": {"app": "web"},
            "creationTimestamp": "2024-03-01T10:00:00Z"
        },
        "spec": {
            "containers": [
                {"name": "app", "ports": [{"name": "http", "containerPort": 8080, "protocol": "TCP"}]},
                {"name": "metrics", "ports": [{"containerPort": 9090}]},
                {"name": "sidecar"}
            ]
        },
        "status": {
            "phase": "Running",
            "conditions": [
                {"type": "Initialized", "status": "True", "lastTransitionTime": "2024-03-01T10:00:01Z"},
                {"type": "Ready", "status": "True", "lastTransitionTime": "2024-03-01T10:00:05Z"}
            ]
        }
    }"#;

    #[test]
    fn test_pod_conversion() {
        let pod: Pod = serde_json::from_str::<PodObject>(POD_JSON).unwrap().into();

        assert_eq!(pod.name, "web-7d9f");
        assert_eq!(pod.phase, PodPhase::Running);
        assert_eq!(pod.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(
            pod.ports,
            vec![
                ContainerPort::tcp(Some("http"), 8080),
                ContainerPort::tcp(None, 9090)
            ]
        );
        assert_eq!(pod.ready_since.unwrap() - pod.created_at, 5_000);
        assert!(pod.is_ready());
    }

    #[test]
    fn test_unready_pod_has_no_ready_since() {
        let json = r#"{
            "metadata": {"name": "web-1"},
            "status": {"phase": "Pending", "conditions": [{"type": "Ready", "status": "False"}]}
        }"#;
        let pod: Pod = serde_json::from_str::<PodObject>(json).unwrap().into();
        assert_eq!(pod.phase, PodPhase::Pending);
        assert_eq!(pod.ready_since, None);
        assert!(pod.ports.is_empty());
    }

    #[test]
    fn test_service_conversion() {
        let json = r#"{
            "metadata": {"name": "web"},
            "spec": {
                "selector": {"app": "web"},
                "ports": [
                    {"name": "http", "port": 80, "targetPort": "http", "protocol": "TCP"},
                    {"name": "admin", "port": 81, "targetPort": 9000},
                    {"name": "dns", "port": 53, "protocol": "UDP"}
                ]
            }
        }"#;
        let service: Service = serde_json::from_str::<ServiceObject>(json).unwrap().into();

        assert_eq!(service.selector.to_string(), "app=web");
        assert_eq!(
            service.ports[0].target_port,
            Some(PortRef::Name("http".to_string()))
        );
        assert_eq!(service.ports[1].target_port, Some(PortRef::Number(9000)));
        assert_eq!(service.ports[2].target_port, None);
        assert_eq!(service.ports[2].protocol, Protocol::Udp);
    }

    #[test]
    fn test_service_without_selector() {
        let json = r#"{"metadata": {"name": "external"}, "spec": {"selector": null, "ports": []}}"#;
        let service: Service = serde_json::from_str::<ServiceObject>(json).unwrap().into();
        assert!(service.selector.is_empty());
    }

    #[test]
    fn test_deployment_conversion() {
        let json = r#"{
            "metadata": {"name": "api"},
            "spec": {"selector": {"matchLabels": {"app": "api", "tier": "backend"}}}
        }"#;
        let deployment: Deployment = serde_json::from_str::<DeploymentObject>(json)
            .unwrap()
            .into();
        assert_eq!(deployment.selector.to_string(), "app=api,tier=backend");
    }

    #[test]
    fn test_deployment_with_match_expressions() {
        let json = r#"{
            "metadata": {"name": "api"},
            "spec": {"selector": {
                "matchLabels": {"app": "api"},
                "matchExpressions": [
                    {"key": "track", "operator": "In", "values": ["stable"]},
                    {"key": "canary", "operator": "DoesNotExist"}
                ]
            }}
        }"#;
        let deployment: Deployment = serde_json::from_str::<DeploymentObject>(json)
            .unwrap()
            .into();
        assert_eq!(deployment.selector.expressions.len(), 2);
        assert_eq!(
            deployment.selector.to_string(),
            "app=api,track in (stable),!canary"
        );

        let json = r#"{
            "metadata": {"name": "worker"},
            "spec": {"selector": {"matchExpressions": [{"key": "role", "operator": "Exists"}]}}
        }"#;
        let deployment: Deployment = serde_json::from_str::<DeploymentObject>(json)
            .unwrap()
            .into();
        assert!(!deployment.selector.is_empty());
        assert_eq!(deployment.selector.to_string(), "role");
    }

    #[test]
    fn test_unknown_selector_operator_is_rejected() {
        let json = r#"{
            "metadata": {"name": "api"},
            "spec": {"selector": {"matchExpressions": [{"key": "a", "operator": "Gt", "values": ["1"]}]}}
        }"#;
        assert!(serde_json::from_str::<DeploymentObject>(json).is_err());
    }

    #[test]
    fn test_list_of_pods() {
        let json = format!(r#"{{"apiVersion": "v1", "items": [{}]}}"#, POD_JSON);
        let list: List<PodObject> = serde_json::from_str(&json).unwrap();
        assert_eq!(list.items.len(), 1);

        let empty: List<PodObject> = serde_json::from_str(r#"{"apiVersion": "v1"}"#).unwrap();
        assert!(empty.items.is_empty());
    }
}
