//! Forwardfile parsing and validation

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::{duration_secs, string_or_number};
use crate::error::ConfigError;
use crate::types::{
    FailurePolicy, ForwardSpec, PortRef, TargetSelector, DEFAULT_BIND_ADDRESS, DEFAULT_NAMESPACE,
};

/// How long a service or deployment forward waits for a ready pod
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

fn default_backend_timeout() -> Duration {
    DEFAULT_BACKEND_TIMEOUT
}

/// On-disk layout of a Forwardfile
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawForwardfile {
    #[serde(default)]
    relaxed: bool,
    #[serde(default)]
    order: Vec<String>,
    #[serde(default = "default_backend_timeout", with = "duration_secs")]
    backend_timeout: Duration,
    #[serde(default)]
    forwards: BTreeMap<String, RawForward>,
}

/// On-disk layout of one `[forwards.<name>]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawForward {
    context: Option<String>,
    namespace: Option<String>,
    pod: Option<String>,
    deployment: Option<String>,
    service: Option<String>,
    #[serde(default, deserialize_with = "string_or_number::deserialize")]
    remote: String,
    #[serde(default, deserialize_with = "string_or_number::option::deserialize")]
    local: Option<String>,
}

/// A loaded, validated Forwardfile
#[derive(Debug, Clone)]
pub struct Forwardfile {
    /// Where the file was loaded from
    pub path: PathBuf,
    /// Keep unaffected forwards alive when one fails
    pub relaxed: bool,
    /// Wait bound for a ready pod behind a service or deployment
    pub backend_timeout: Duration,
    /// Forwards in startup order
    pub forwards: Vec<ForwardSpec>,
}

impl Forwardfile {
    /// Parse and validate Forwardfile content
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawForwardfile = toml::from_str(content)?;

        let mut specs: BTreeMap<String, ForwardSpec> = BTreeMap::new();
        for (name, forward) in raw.forwards {
            let spec = forward.into_spec(&name)?;
            specs.insert(name, spec);
        }

        let forwards = apply_order(specs, &raw.order)?;
        check_bindings(&forwards)?;

        Ok(Self {
            path: path.to_path_buf(),
            relaxed: raw.relaxed,
            backend_timeout: raw.backend_timeout,
            forwards,
        })
    }

    /// Failure policy selected by the `relaxed` flag
    pub fn policy(&self) -> FailurePolicy {
        FailurePolicy::from_relaxed(self.relaxed)
    }

    /// Forward names in startup order
    pub fn names(&self) -> Vec<&str> {
        self.forwards.iter().map(|f| f.name.as_str()).collect()
    }
}

impl RawForward {
    fn into_spec(self, name: &str) -> Result<ForwardSpec, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidForward {
            name: name.to_string(),
            reason,
        };

        let target = match (self.pod, self.deployment, self.service) {
            (Some(pod), None, None) if !pod.is_empty() => TargetSelector::Pod(pod),
            (None, Some(deployment), None) if !deployment.is_empty() => {
                TargetSelector::Deployment(deployment)
            }
            (None, None, Some(service)) if !service.is_empty() => TargetSelector::Service(service),
            _ => {
                return Err(invalid(
                    "exactly one of pod, deployment or service must be specified".to_string(),
                ))
            }
        };

        let remote: PortRef = self.remote.parse().map_err(invalid)?;

        let (bind_address, bind_port) = match self.local.as_deref() {
            None | Some("") => (DEFAULT_BIND_ADDRESS, 0),
            Some(local) => parse_local(local).map_err(invalid)?,
        };

        Ok(ForwardSpec {
            name: name.to_string(),
            target,
            namespace: self
                .namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            remote,
            bind_address,
            bind_port,
            context: self.context.filter(|c| !c.is_empty()),
        })
    }
}

/// Parse `port`, `addr:port` (IPv6 as `[addr]:port`) or `host:port`.
/// A host name is resolved once, preferring IPv4.
fn parse_local(local: &str) -> Result<(IpAddr, u16), String> {
    if let Ok(port) = local.parse::<u16>() {
        return Ok((DEFAULT_BIND_ADDRESS, port));
    }
    if let Ok(addr) = local.parse::<SocketAddr>() {
        return Ok((addr.ip(), addr.port()));
    }

    let invalid = || format!("invalid local address format '{}'", local);
    let (host, port) = local.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(':') {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve local host '{}': {}", host, e))?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .map(|addr| (addr.ip(), port))
        .ok_or_else(|| format!("local host '{}' has no address", host))
}

fn apply_order(
    mut specs: BTreeMap<String, ForwardSpec>,
    order: &[String],
) -> Result<Vec<ForwardSpec>, ConfigError> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(specs.len());

    for name in order {
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::InvalidOrder(format!(
                "'{}' is listed more than once",
                name
            )));
        }
        let spec = specs.remove(name).ok_or_else(|| {
            ConfigError::InvalidOrder(format!("'{}' does not name a forward", name))
        })?;
        ordered.push(spec);
    }

    // Unlisted forwards follow in name order
    ordered.extend(specs.into_values());
    Ok(ordered)
}

fn check_bindings(forwards: &[ForwardSpec]) -> Result<(), ConfigError> {
    let mut claimed: HashMap<(IpAddr, u16), &str> = HashMap::new();
    for spec in forwards.iter().filter(|s| !s.has_dynamic_port()) {
        if let Some(first) = claimed.insert((spec.bind_address, spec.bind_port), &spec.name) {
            return Err(ConfigError::DuplicateBinding {
                first: first.to_string(),
                second: spec.name.clone(),
                address: SocketAddr::new(spec.bind_address, spec.bind_port).to_string(),
            });
        }
    }
    Ok(())
}
