//! Target resolution
//!
//! Turns a forward's target selector into a concrete pod and numeric port.
//! Services and deployments are resolved through their label selectors; when
//! several pods match, the choice is a total order over the candidates so that
//! the same cluster state always yields the same pod:
//!
//! 1. ready pods only
//! 2. longest continuous readiness (earliest ready-since)
//! 3. oldest creation time
//! 4. pod name

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use k4_core::cluster::{ContainerPort, LabelSelector, Pod, PodPhase, Protocol, Service, ServicePort};
use k4_core::config::DEFAULT_BACKEND_TIMEOUT;
use k4_core::error::ResolutionError;
use k4_core::time::elapsed_duration;
use k4_core::traits::ClusterApi;
use k4_core::types::{ForwardSpec, PortRef, ResolvedEndpoint, TargetSelector};

/// Interval between pod listings while waiting for a ready backend
const BACKEND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Resolves forward specs against the cluster
pub struct TargetResolver {
    cluster: Arc<dyn ClusterApi>,
    backend_timeout: Duration,
    poll_interval: Duration,
}

impl TargetResolver {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            poll_interval: BACKEND_POLL_INTERVAL,
        }
    }

    /// Bound the wait for a ready pod behind a service or deployment
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Resolve a spec to a running pod and a TCP port on it
    pub async fn resolve(&self, spec: &ForwardSpec) -> Result<ResolvedEndpoint, ResolutionError> {
        let (pod, port) = match &spec.target {
            TargetSelector::Pod(name) => {
                let pod = self.pod(spec, name).await?;
                let port = container_port(&pod, &spec.remote)?;
                (pod, port)
            }
            TargetSelector::Service(name) => self.resolve_service(spec, name).await?,
            TargetSelector::Deployment(name) => {
                let deployment = self
                    .cluster
                    .deployment(spec.context.as_deref(), &spec.namespace, name)
                    .await?
                    .ok_or_else(|| not_found("deployment", name, spec))?;
                if deployment.selector.is_empty() {
                    return Err(not_found("pod selector of deployment", name, spec));
                }
                let pod = self.wait_for_backend(spec, &deployment.selector).await?;
                let port = container_port(&pod, &spec.remote)?;
                (pod, port)
            }
        };

        if pod.phase != PodPhase::Running {
            return Err(ResolutionError::NotRunning {
                pod: pod.name,
                phase: pod.phase.to_string(),
            });
        }

        tracing::debug!(
            forward = %spec.name,
            "Resolved {} to pod {} port {}",
            spec.target,
            pod.name,
            port
        );

        Ok(ResolvedEndpoint {
            pod: pod.name,
            port,
        })
    }

    async fn pod(&self, spec: &ForwardSpec, name: &str) -> Result<Pod, ResolutionError> {
        self.cluster
            .pod(spec.context.as_deref(), &spec.namespace, name)
            .await?
            .ok_or_else(|| not_found("pod", name, spec))
    }

    async fn resolve_service(
        &self,
        spec: &ForwardSpec,
        name: &str,
    ) -> Result<(Pod, u16), ResolutionError> {
        let service = self
            .cluster
            .service(spec.context.as_deref(), &spec.namespace, name)
            .await?
            .ok_or_else(|| not_found("service", name, spec))?;

        let service_port = service_port(&service, &spec.remote)?.clone();

        if service.selector.is_empty() {
            return Err(not_found("pod selector of service", name, spec));
        }
        let pod = self.wait_for_backend(spec, &service.selector).await?;

        // The service port may name a container port that differs from its own name
        let port = match &service_port.target_port {
            None => service_port.port,
            Some(PortRef::Number(port)) => *port,
            Some(target @ PortRef::Name(_)) => container_port(&pod, target)?,
        };

        Ok((pod, port))
    }

    /// Poll the selector until a ready pod exists or the timeout expires
    async fn wait_for_backend(
        &self,
        spec: &ForwardSpec,
        selector: &LabelSelector,
    ) -> Result<Pod, ResolutionError> {
        match tokio::time::timeout(self.backend_timeout, self.poll_backend(spec, selector)).await {
            Ok(result) => result,
            Err(_) => Err(ResolutionError::NoReadyBackend {
                selector: selector.to_string(),
                timeout: self.backend_timeout,
            }),
        }
    }

    async fn poll_backend(
        &self,
        spec: &ForwardSpec,
        selector: &LabelSelector,
    ) -> Result<Pod, ResolutionError> {
        loop {
            let pods = self
                .cluster
                .pods_matching(spec.context.as_deref(), &spec.namespace, selector)
                .await?;

            if let Some(pod) = select_backend(&pods) {
                if let Some(since) = pod.ready_since {
                    tracing::debug!(
                        forward = %spec.name,
                        "Selected pod {} out of {} candidates (ready for {:?})",
                        pod.name,
                        pods.len(),
                        elapsed_duration(since)
                    );
                }
                return Ok(pod.clone());
            }

            tracing::debug!(
                forward = %spec.name,
                "No ready pod matching '{}' yet ({} candidates)",
                selector,
                pods.len()
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Pick the preferred ready pod, if any
pub fn select_backend(pods: &[Pod]) -> Option<&Pod> {
    pods.iter()
        .filter(|pod| pod.is_ready())
        .min_by(|a, b| candidate_order(a, b))
}

/// Total preference order over candidate pods, most preferred first
pub fn candidate_order(a: &Pod, b: &Pod) -> Ordering {
    b.is_ready()
        .cmp(&a.is_ready())
        .then_with(|| match (a.ready_since, b.ready_since) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.name.cmp(&b.name))
}

/// Resolve a port reference against a pod's declared container ports.
///
/// Numeric ports need not be declared; if they are, a TCP declaration must exist.
fn container_port(pod: &Pod, remote: &PortRef) -> Result<u16, ResolutionError> {
    let target = format!("pod/{}", pod.name);
    let matches: Vec<&ContainerPort> = match remote {
        PortRef::Number(port) => {
            let declared: Vec<&ContainerPort> =
                pod.ports.iter().filter(|p| p.port == *port).collect();
            if declared.is_empty() {
                return Ok(*port);
            }
            declared
        }
        PortRef::Name(name) => pod
            .ports
            .iter()
            .filter(|p| p.name.as_deref() == Some(name.as_str()))
            .collect(),
    };

    pick_stream_port(matches, |p| p.protocol, remote, &target).map(|p| p.port)
}

/// Resolve a port reference against a service's declared ports
fn service_port<'a>(
    service: &'a Service,
    remote: &PortRef,
) -> Result<&'a ServicePort, ResolutionError> {
    let target = format!("service/{}", service.name);
    let matches: Vec<&ServicePort> = service
        .ports
        .iter()
        .filter(|p| match remote {
            PortRef::Number(port) => p.port == *port,
            PortRef::Name(name) => p.name.as_deref() == Some(name.as_str()),
        })
        .collect();

    pick_stream_port(matches, |p| p.protocol, remote, &target)
}

/// Narrow declared ports down to exactly one TCP port
fn pick_stream_port<'a, T>(
    matches: Vec<&'a T>,
    protocol: impl Fn(&T) -> Protocol,
    remote: &PortRef,
    target: &str,
) -> Result<&'a T, ResolutionError> {
    let Some(first) = matches.first() else {
        return Err(ResolutionError::AmbiguousPort {
            port: remote.to_string(),
            target: target.to_string(),
        });
    };
    let first_protocol = protocol(first);

    let mut streams = matches.into_iter().filter(|p| protocol(p).is_stream());
    match (streams.next(), streams.next()) {
        (Some(port), None) => Ok(port),
        (None, _) => Err(ResolutionError::UnsupportedProtocol {
            port: remote.to_string(),
            target: target.to_string(),
            protocol: first_protocol.to_string(),
        }),
        (Some(_), Some(_)) => Err(ResolutionError::AmbiguousPort {
            port: remote.to_string(),
            target: target.to_string(),
        }),
    }
}

fn not_found(kind: &'static str, name: &str, spec: &ForwardSpec) -> ResolutionError {
    ResolutionError::NotFound {
        kind,
        name: name.to_string(),
        namespace: spec.namespace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use k4_core::cluster::Deployment;
    use k4_core::time::current_time_millis;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCluster {
        pods: Mutex<HashMap<String, Pod>>,
        services: HashMap<String, Service>,
        deployments: HashMap<String, Deployment>,
    }

    impl FakeCluster {
        fn add_pod(&self, pod: Pod) {
            self.pods.lock().unwrap().insert(pod.name.clone(), pod);
        }
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn pod(
            &self,
            _context: Option<&str>,
            _namespace: &str,
            name: &str,
        ) -> Result<Option<Pod>, ResolutionError> {
            Ok(self.pods.lock().unwrap().get(name).cloned())
        }

        async fn service(
            &self,
            _context: Option<&str>,
            _namespace: &str,
            name: &str,
        ) -> Result<Option<Service>, ResolutionError> {
            Ok(self.services.get(name).cloned())
        }

        async fn deployment(
            &self,
            _context: Option<&str>,
            _namespace: &str,
            name: &str,
        ) -> Result<Option<Deployment>, ResolutionError> {
            Ok(self.deployments.get(name).cloned())
        }

        async fn pods_matching(
            &self,
            _context: Option<&str>,
            _namespace: &str,
            selector: &LabelSelector,
        ) -> Result<Vec<Pod>, ResolutionError> {
            let mut pods: Vec<Pod> = self
                .pods
                .lock()
                .unwrap()
                .values()
                .filter(|p| selector.matches(&p.labels))
                .cloned()
                .collect();
            // Listing order must not influence the choice
            pods.sort_by(|a, b| b.name.cmp(&a.name));
            Ok(pods)
        }
    }

    fn app_labels(app: &str) -> BTreeMap<String, String> {
        [("app".to_string(), app.to_string())].into_iter().collect()
    }

    fn pod(name: &str, app: &str, ready_for_secs: Option<u64>, ports: Vec<ContainerPort>) -> Pod {
        let now = current_time_millis();
        Pod {
            name: name.to_string(),
            phase: PodPhase::Running,
            labels: app_labels(app),
            ports,
            created_at: now - 60_000,
            ready_since: ready_for_secs.map(|s| now - s * 1000),
        }
    }

    fn web_service(target_port: Option<PortRef>) -> Service {
        Service {
            name: "web".to_string(),
            selector: [("app", "web")].into_iter().collect(),
            ports: vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port,
                protocol: Protocol::Tcp,
            }],
        }
    }

    fn resolver(cluster: FakeCluster) -> TargetResolver {
        TargetResolver::new(Arc::new(cluster))
    }

    fn spec(target: TargetSelector, remote: &str) -> ForwardSpec {
        ForwardSpec::new("test", target, remote.parse().unwrap())
    }

    #[tokio::test]
    async fn test_pod_named_port() {
        let cluster = FakeCluster::default();
        cluster.add_pod(pod(
            "web",
            "web",
            Some(5),
            vec![ContainerPort::tcp(Some("http"), 8080)],
        ));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Pod("web".to_string()), "http"))
            .await
            .unwrap();

        assert_eq!(
            endpoint,
            ResolvedEndpoint {
                pod: "web".to_string(),
                port: 8080
            }
        );
    }

    #[tokio::test]
    async fn test_pod_numeric_port_need_not_be_declared() {
        let cluster = FakeCluster::default();
        cluster.add_pod(pod("web", "web", Some(5), vec![]));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Pod("web".to_string()), "9090"))
            .await
            .unwrap();
        assert_eq!(endpoint.port, 9090);
    }

    #[tokio::test]
    async fn test_pod_not_found() {
        let err = resolver(FakeCluster::default())
            .resolve(&spec(TargetSelector::Pod("ghost".to_string()), "http"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { kind: "pod", .. }));
    }

    #[tokio::test]
    async fn test_pod_unknown_port_name() {
        let cluster = FakeCluster::default();
        cluster.add_pod(pod(
            "web",
            "web",
            Some(5),
            vec![ContainerPort::tcp(Some("http"), 8080)],
        ));

        let err = resolver(cluster)
            .resolve(&spec(TargetSelector::Pod("web".to_string()), "grpc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::AmbiguousPort { .. }));
    }

    #[tokio::test]
    async fn test_pod_not_running() {
        let cluster = FakeCluster::default();
        let mut pending = pod("web", "web", None, vec![ContainerPort::tcp(Some("http"), 8080)]);
        pending.phase = PodPhase::Pending;
        cluster.add_pod(pending);

        let err = resolver(cluster)
            .resolve(&spec(TargetSelector::Pod("web".to_string()), "http"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::NotRunning {
                pod: "web".to_string(),
                phase: "Pending".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_udp_port_is_unsupported() {
        let cluster = FakeCluster::default();
        cluster.add_pod(pod(
            "dns",
            "dns",
            Some(5),
            vec![ContainerPort {
                name: Some("dns".to_string()),
                port: 53,
                protocol: Protocol::Udp,
            }],
        ));
        let resolver = resolver(cluster);

        for remote in ["dns", "53"] {
            let err = resolver
                .resolve(&spec(TargetSelector::Pod("dns".to_string()), remote))
                .await
                .unwrap_err();
            assert!(matches!(err, ResolutionError::UnsupportedProtocol { .. }));
        }
    }

    #[tokio::test]
    async fn test_tcp_preferred_over_udp_on_same_number() {
        let cluster = FakeCluster::default();
        cluster.add_pod(pod(
            "dns",
            "dns",
            Some(5),
            vec![
                ContainerPort {
                    name: Some("dns-udp".to_string()),
                    port: 53,
                    protocol: Protocol::Udp,
                },
                ContainerPort::tcp(Some("dns-tcp"), 53),
            ],
        ));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Pod("dns".to_string()), "53"))
            .await
            .unwrap();
        assert_eq!(endpoint.port, 53);
    }

    #[tokio::test]
    async fn test_service_prefers_longest_ready_pod() {
        let mut cluster = FakeCluster::default();
        cluster.services.insert("web".to_string(), web_service(None));
        cluster.add_pod(pod("web-young", "web", Some(2), vec![]));
        cluster.add_pod(pod("web-old", "web", Some(10), vec![]));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Service("web".to_string()), "http"))
            .await
            .unwrap();

        assert_eq!(endpoint.pod, "web-old");
        assert_eq!(endpoint.port, 80);
    }

    #[tokio::test]
    async fn test_service_skips_unready_pods() {
        let mut cluster = FakeCluster::default();
        cluster.services.insert("web".to_string(), web_service(None));
        cluster.add_pod(pod("web-starting", "web", None, vec![]));
        cluster.add_pod(pod("web-ready", "web", Some(1), vec![]));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Service("web".to_string()), "80"))
            .await
            .unwrap();
        assert_eq!(endpoint.pod, "web-ready");
    }

    #[tokio::test]
    async fn test_service_maps_named_target_port() {
        let mut cluster = FakeCluster::default();
        cluster.services.insert(
            "web".to_string(),
            web_service(Some(PortRef::Name("http-alt".to_string()))),
        );
        cluster.add_pod(pod(
            "web-0",
            "web",
            Some(3),
            vec![ContainerPort::tcp(Some("http-alt"), 8080)],
        ));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Service("web".to_string()), "http"))
            .await
            .unwrap();
        assert_eq!(endpoint.port, 8080);
    }

    #[tokio::test]
    async fn test_service_maps_numeric_target_port() {
        let mut cluster = FakeCluster::default();
        cluster
            .services
            .insert("web".to_string(), web_service(Some(PortRef::Number(3000))));
        cluster.add_pod(pod("web-0", "web", Some(3), vec![]));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Service("web".to_string()), "80"))
            .await
            .unwrap();
        assert_eq!(endpoint.port, 3000);
    }

    #[tokio::test]
    async fn test_service_unknown_port() {
        let mut cluster = FakeCluster::default();
        cluster.services.insert("web".to_string(), web_service(None));
        cluster.add_pod(pod("web-0", "web", Some(3), vec![]));

        let err = resolver(cluster)
            .resolve(&spec(TargetSelector::Service("web".to_string()), "443"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::AmbiguousPort { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_without_ready_pods_times_out() {
        let mut cluster = FakeCluster::default();
        cluster.services.insert("web".to_string(), web_service(None));
        cluster.add_pod(pod("web-starting", "web", None, vec![]));

        let resolver = resolver(cluster).with_backend_timeout(Duration::from_secs(5));
        let err = resolver
            .resolve(&spec(TargetSelector::Service("web".to_string()), "http"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ResolutionError::NoReadyBackend {
                selector: "app=web".to_string(),
                timeout: Duration::from_secs(5)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_waits_for_pod_to_become_ready() {
        let mut cluster = FakeCluster::default();
        cluster.services.insert("web".to_string(), web_service(None));
        let cluster = Arc::new(cluster);

        let resolver = TargetResolver::new(cluster.clone() as Arc<dyn ClusterApi>)
            .with_poll_interval(Duration::from_millis(100));
        let spec = spec(TargetSelector::Service("web".to_string()), "http");
        let resolving = tokio::spawn(async move { resolver.resolve(&spec).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cluster.add_pod(pod("web-late", "web", Some(0), vec![]));

        let endpoint = resolving.await.unwrap().unwrap();
        assert_eq!(endpoint.pod, "web-late");
    }

    #[tokio::test]
    async fn test_deployment_resolves_port_on_pod() {
        let mut cluster = FakeCluster::default();
        cluster.deployments.insert(
            "api".to_string(),
            Deployment {
                name: "api".to_string(),
                selector: [("app", "api")].into_iter().collect(),
            },
        );
        cluster.add_pod(pod(
            "api-7d9f-abcde",
            "api",
            Some(30),
            vec![ContainerPort::tcp(Some("grpc"), 9000)],
        ));

        let endpoint = resolver(cluster)
            .resolve(&spec(TargetSelector::Deployment("api".to_string()), "grpc"))
            .await
            .unwrap();
        assert_eq!(endpoint.pod, "api-7d9f-abcde");
        assert_eq!(endpoint.port, 9000);
    }

    #[tokio::test]
    async fn test_deployment_not_found() {
        let err = resolver(FakeCluster::default())
            .resolve(&spec(TargetSelector::Deployment("api".to_string()), "grpc"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::NotFound {
                kind: "deployment",
                ..
            }
        ));
    }

    #[test]
    fn test_candidate_order_tie_breaks() {
        let mut a = pod("b-pod", "web", Some(10), vec![]);
        let mut b = pod("a-pod", "web", Some(10), vec![]);
        b.ready_since = a.ready_since;

        // Same readiness and creation time: name decides
        b.created_at = a.created_at;
        assert_eq!(select_backend(&[a.clone(), b.clone()]).unwrap().name, "a-pod");

        // Older creation wins over name
        a.created_at -= 1_000;
        assert_eq!(select_backend(&[b.clone(), a.clone()]).unwrap().name, "b-pod");

        // Readiness wins over creation time
        b.ready_since = b.ready_since.map(|t| t - 5_000);
        assert_eq!(select_backend(&[a.clone(), b.clone()]).unwrap().name, "a-pod");

        assert_eq!(candidate_order(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_select_backend_none_ready() {
        let pods = vec![pod("a", "web", None, vec![]), pod("b", "web", None, vec![])];
        assert!(select_backend(&pods).is_none());
    }
}
