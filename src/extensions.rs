//! Extensions describe their own API at `/`. Everything that index points to is
//! sampled, including the target endpoints each discovery describes.

use crate::collect::{Collector, collect_pod_basics, collect_workload_basics};
use crate::fanout::fork_join;
use crate::kubernetes::{find_annotated_workloads, for_each_pod};
use crate::sampler::{HttpSampler, SampleTarget};
use crate::tunnel::Tunnel;
use crate::types::{EndpointSpec, PodPort, PodSnapshot, Workload, WorkloadKind};
use crate::utils::endpoint_file_name;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const EXTENSION_AUTO_DISCOVERY_ANNOTATION: &str = "steadybit.com/extension-auto-discovery";
pub const EXTENSION_PORT_ENV: &str = "STEADYBIT_EXTENSION_PORT";
pub const DEFAULT_EXTENSION_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointRef {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Union of the action, discovery and event listener indexes an extension serves at `/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityManifest {
    pub actions: Vec<EndpointRef>,
    pub discoveries: Vec<EndpointRef>,
    pub target_types: Vec<EndpointRef>,
    pub target_attributes: Vec<EndpointRef>,
    pub event_listeners: Vec<EndpointRef>,
}

impl CapabilityManifest {
    /// `/` followed by every declared endpoint.
    pub fn endpoints(&self) -> Vec<EndpointRef> {
        std::iter::once(EndpointRef {
            method: "GET".to_string(),
            path: "/".to_string(),
        })
        .chain(self.actions.iter().cloned())
        .chain(self.discoveries.iter().cloned())
        .chain(self.target_attributes.iter().cloned())
        .chain(self.target_types.iter().cloned())
        .chain(self.event_listeners.iter().cloned())
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDescription {
    pub discover: EndpointRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AutoDiscovery {
    #[serde(default)]
    extensions: Vec<AutoDiscoveryExtension>,
}

#[derive(Debug, Clone, Deserialize)]
struct AutoDiscoveryExtension {
    port: Option<u16>,
    #[serde(default)]
    tls: Option<AutoDiscoveryTls>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AutoDiscoveryTls {
    #[serde(default)]
    server: Option<serde_json::Value>,
    #[serde(default)]
    client: Option<serde_json::Value>,
}

impl AutoDiscoveryExtension {
    fn uses_tls(&self) -> bool {
        self.tls
            .as_ref()
            .is_some_and(|tls| tls.server.is_some() || tls.client.is_some())
    }
}

/// Ports to traverse, from the auto-discovery annotation, the port env var or the default.
pub fn identify_pod_ports(pod: &PodSnapshot, annotations: &BTreeMap<String, String>) -> Vec<PodPort> {
    let default_port = PodPort {
        port: DEFAULT_EXTENSION_PORT,
        tls: false,
    };

    if let Some(raw) = annotations.get(EXTENSION_AUTO_DISCOVERY_ANNOTATION) {
        return match serde_json::from_str::<AutoDiscovery>(raw) {
            Ok(discovery) => discovery
                .extensions
                .iter()
                .filter_map(|ext| {
                    let Some(port) = ext.port else {
                        warn!(
                            "[{}/{}] Auto discovery entry without port ignored",
                            pod.namespace, pod.name
                        );
                        return None;
                    };
                    Some(PodPort {
                        port,
                        tls: ext.uses_tls(),
                    })
                })
                .collect(),
            Err(e) => {
                warn!("Failed to parse extension auto discovery annotation: {}", e);
                vec![default_port]
            }
        };
    }

    if let Some(port) = pod
        .env_value(EXTENSION_PORT_ENV)
        .and_then(|v| v.trim().parse::<u16>().ok())
    {
        return vec![PodPort { port, tls: false }];
    }

    vec![default_port]
}

/// Turns each discovered endpoint into something the sampler writes under its method and path.
pub fn endpoint_specs(endpoints: &[EndpointRef]) -> Vec<EndpointSpec> {
    let mut seen = BTreeSet::new();
    endpoints
        .iter()
        .filter(|e| seen.insert(endpoint_file_name(&e.method, &e.path)))
        .map(|e| EndpointSpec {
            method: e.method.to_uppercase(),
            path: e.path.clone(),
            output: endpoint_file_name(&e.method, &e.path),
            executions: 1,
            delay: std::time::Duration::from_secs(1),
        })
        .collect()
}

/// Fetches the index and each discovery description, returning the full endpoint list.
pub async fn discover_endpoints(sampler: &HttpSampler, target: &SampleTarget) -> Vec<EndpointRef> {
    let index_url = target.url_for("/");
    let manifest = match sampler.fetch("GET", &index_url, target.use_https).await {
        Ok(body) => match serde_json::from_slice::<CapabilityManifest>(&body) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(
                    "[{}] Failed to parse response body of '{}': {}: {}",
                    target.context,
                    index_url,
                    e,
                    String::from_utf8_lossy(&body)
                );
                CapabilityManifest::default()
            }
        },
        Err(e) => {
            error!("[{}] Failed to get '{}': {}", target.context, index_url, e);
            CapabilityManifest::default()
        }
    };

    let mut endpoints = manifest.endpoints();
    for discovery in &manifest.discoveries {
        if let Some(discover) = describe_discovery(sampler, target, discovery).await {
            endpoints.push(discover);
        }
    }
    endpoints
}

async fn describe_discovery(
    sampler: &HttpSampler,
    target: &SampleTarget,
    discovery: &EndpointRef,
) -> Option<EndpointRef> {
    let url = target.url_for(&discovery.path);
    let body = match sampler.fetch(&discovery.method, &url, target.use_https).await {
        Ok(body) => body,
        Err(e) => {
            error!("[{}] Failed to get '{}': {}", target.context, url, e);
            return None;
        }
    };
    match serde_json::from_slice::<DiscoveryDescription>(&body) {
        Ok(description) => Some(description.discover),
        Err(e) => {
            error!(
                "[{}] Failed to parse discovery description of '{}': {}",
                target.context, url, e
            );
            None
        }
    }
}

/// Samples every discovered endpoint concurrently into `output_dir`.
pub async fn sample_all(
    sampler: &HttpSampler,
    target: &SampleTarget,
    endpoints: &[EndpointRef],
    output_dir: &Path,
) {
    let units = endpoint_specs(endpoints).into_iter().map(|spec| {
        let sampler = sampler.clone();
        let target = target.clone();
        let dir = output_dir.to_path_buf();
        let label = format!("{} {}", spec.method, spec.path);
        (label, async move {
            sampler.sample_to_file(&target, &spec, &dir, true).await;
        })
    });
    fork_join(&target.context, units).await;
}

/// Tunnels to `port` on the pod, discovers its endpoints and samples them all.
pub async fn discover_and_sample_all(
    collector: &Collector,
    pod: &PodSnapshot,
    port: PodPort,
    output_dir: PathBuf,
) {
    let context = format!("{}/{}", pod.namespace, pod.name);
    let tunnel = match Tunnel::open(
        &collector.kubectl,
        &pod.namespace,
        &pod.name,
        port.port,
        collector.config.tunnel_timeout(),
    )
    .await
    {
        Ok(tunnel) => tunnel,
        Err(e) => {
            error!(
                "[{}] Failed to port-forward to port {}: {}",
                context, port.port, e
            );
            return;
        }
    };

    tunnel
        .scoped(|address| async move {
            let target = SampleTarget::new(&address, port.tls, context);
            let endpoints = discover_endpoints(&collector.sampler, &target).await;
            debug!(
                "[{}] Sampling {} extension endpoint(s)",
                target.context,
                endpoints.len()
            );
            sample_all(&collector.sampler, &target, &endpoints, &output_dir).await;
        })
        .await;
}

fn ports_for(workload: &Workload, pod: &PodSnapshot) -> Vec<PodPort> {
    match workload.kind {
        WorkloadKind::Service => identify_pod_ports(pod, &workload.annotations),
        _ => identify_pod_ports(pod, &pod.annotations),
    }
}

async fn collect_extension(collector: Arc<Collector>, workload: Workload) {
    let path_for_extension = collector
        .root
        .join("extensions")
        .join(&workload.namespace)
        .join(&workload.name);
    collect_workload_basics(&collector, &workload, &path_for_extension).await;

    let workload = Arc::new(workload);
    for_each_pod(&collector.client, &workload, |pod, _| {
        let collector = collector.clone();
        let workload = workload.clone();
        let path_for_pod = path_for_extension.join("pods").join(&pod.name);
        async move {
            collect_pod_basics(&collector, &pod, &path_for_pod, 3).await;

            let ports = ports_for(&workload, &pod);
            let passes = ports.into_iter().map(|port| {
                let collector = collector.clone();
                let pod = pod.clone();
                let dir = path_for_pod.join(port.folder_name());
                (format!("{}:{}", pod.name, port.port), async move {
                    discover_and_sample_all(&collector, &pod, port, dir).await;
                })
            });
            fork_join(&format!("{}/{}", pod.namespace, pod.name), passes).await;
        }
    })
    .await;
}

pub async fn collect_extensions(collector: Arc<Collector>) {
    let workloads =
        match find_annotated_workloads(&collector.client, EXTENSION_AUTO_DISCOVERY_ANNOTATION).await {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!("Failed to find extensions - looking up namespaces: {}", e);
                return;
            }
        };

    let units = workloads.into_iter().map(|workload| {
        let label = format!("{} {}/{}", workload.kind, workload.namespace, workload.name);
        (label, collect_extension(collector.clone(), workload))
    });
    fork_join("extensions", units).await;
}
