use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
    Service,
}

impl WorkloadKind {
    /// Resource name as understood by `kubectl`.
    pub fn as_kubectl(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::Service => "service",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_kubectl())
    }
}

#[derive(Debug, Clone)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    /// Selector in API syntax, `None` when the workload selects nothing.
    pub selector: Option<String>,
    /// Service metadata annotations, or the pod template annotations of a daemon set.
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerSnapshot {
    pub name: String,
    pub env: BTreeMap<String, String>,
}

/// The parts of a pod the collectors look at, captured once per unit of work.
#[derive(Debug, Clone, Default)]
pub struct PodSnapshot {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<ContainerSnapshot>,
    pub annotations: BTreeMap<String, String>,
}

impl PodSnapshot {
    /// Looks up an environment variable across all containers, ignoring the name's case.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.containers.iter().find_map(|c| {
            c.env
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn first_container(&self) -> Option<&str> {
        self.containers.first().map(|c| c.name.as_str())
    }
}

impl From<&Pod> for PodSnapshot {
    fn from(pod: &Pod) -> Self {
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .map(|c| ContainerSnapshot {
                        name: c.name.clone(),
                        // Only literal values; valueFrom references are not resolved.
                        env: c
                            .env
                            .iter()
                            .flatten()
                            .filter_map(|e| e.value.clone().map(|v| (e.name.clone(), v)))
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        PodSnapshot {
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            containers,
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
        }
    }
}

/// One thing to sample over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSpec {
    pub method: String,
    /// Path relative to the tunnel's base URL, or a full URL.
    pub path: String,
    /// File name, containing `%d` when `executions > 1`.
    pub output: String,
    pub executions: usize,
    pub delay: Duration,
}

impl EndpointSpec {
    pub fn get(path: impl Into<String>, output: impl Into<String>) -> Self {
        EndpointSpec {
            method: "GET".to_string(),
            path: path.into(),
            output: output.into(),
            executions: 1,
            delay: Duration::from_secs(1),
        }
    }

    pub fn repeated(mut self, executions: usize, delay: Duration) -> Self {
        self.executions = executions;
        self.delay = delay;
        self
    }
}

/// Port an extension listens on and whether it speaks TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodPort {
    pub port: u16,
    pub tls: bool,
}

impl PodPort {
    pub fn folder_name(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }
}
