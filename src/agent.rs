use crate::collect::{
    Collector, collect_pod_basics, collect_workload_basics, sample_pod_endpoints,
};
use crate::ephemeral::{EphemeralProbe, run_ephemeral_probe};
use crate::kubernetes::{find_workload, for_each_pod};
use crate::types::{EndpointSpec, PodSnapshot, WorkloadKind};
use reqwest::Url;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const AGENT_PORT_ENV: &str = "STEADYBIT_HTTP_ENDPOINT_PORT";
pub const DEFAULT_AGENT_PORT: u16 = 42899;
pub const REGISTER_URL_ENV: &str = "STEADYBIT_AGENT_REGISTER_URL";

pub fn identify_agent_port(pod: &PodSnapshot) -> u16 {
    pod.env_value(AGENT_PORT_ENV)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_AGENT_PORT)
}

pub fn agent_endpoints() -> Vec<EndpointSpec> {
    vec![
        EndpointSpec::get("/env", "env.yml"),
        EndpointSpec::get("/health", "health.yml"),
        EndpointSpec::get("/prometheus", "prometheus_metrics.%d.txt")
            .repeated(10, Duration::from_millis(500)),
        EndpointSpec::get("/threaddump", "threaddump.yml"),
        EndpointSpec::get("/info", "info.yml"),
        EndpointSpec::get("/self-test", "self_test.yml"),
        EndpointSpec::get("/discovery/info", "discovery_info.yml"),
        EndpointSpec::get("/discovery/targets", "targets.yml"),
        EndpointSpec::get("/discovery/targets/stats", "target_stats.yml"),
        EndpointSpec::get("/discovery/connections", "connections.yml"),
        EndpointSpec::get("/discovery/connections/stats", "connection_stats.yml"),
    ]
}

/// `http(s)://` to `ws(s)://`, keeping host, port and path.
pub fn websocket_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return None,
    };
    let rest = &parsed.as_str()[parsed.scheme().len()..];
    Url::parse(&format!("{}{}", scheme, rest))
        .ok()
        .map(|u| u.to_string())
}

pub fn url_host(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// Connectivity probes from inside the outpost's network towards the platform.
pub fn connection_probes(collector: &Collector, register_url: &str) -> Vec<(String, EphemeralProbe)> {
    let outpost = &collector.config.outpost;
    let mut probes = vec![(
        "curl.txt".to_string(),
        EphemeralProbe {
            tool: "curl".to_string(),
            image: outpost.curl_image.clone(),
            command: vec![
                "curl".to_string(),
                "-v".to_string(),
                "--max-time".to_string(),
                "30".to_string(),
                register_url.to_string(),
            ],
            stdin: None,
            timeout: Some(Duration::from_secs(60)),
        },
    )];
    if let Some(ws) = websocket_url(register_url) {
        probes.push((
            "websocat.txt".to_string(),
            EphemeralProbe {
                tool: "websocat".to_string(),
                image: outpost.websocat_image.clone(),
                command: vec![
                    "websocat".to_string(),
                    "-v".to_string(),
                    "-E".to_string(),
                    ws,
                ],
                stdin: Some(Vec::new()),
                timeout: Some(Duration::from_secs(30)),
            },
        ));
    }
    if let Some(host) = url_host(register_url) {
        probes.push((
            "traceroute.txt".to_string(),
            EphemeralProbe {
                tool: "traceroute".to_string(),
                image: outpost.traceroute_image.clone(),
                command: vec!["traceroute".to_string(), host],
                stdin: None,
                timeout: Some(Duration::from_secs(60)),
            },
        ));
    }
    probes
}

async fn run_connection_tests(collector: &Collector, pod: &PodSnapshot, path: &Path) {
    let Some(register_url) = pod.env_value(REGISTER_URL_ENV) else {
        debug!(
            "[{}/{}] No {} configured, skipping connection tests",
            pod.namespace, pod.name, REGISTER_URL_ENV
        );
        return;
    };
    let dir = path.join("connection-tests");
    let probes = connection_probes(collector, register_url);
    futures::future::join_all(
        probes
            .iter()
            .map(|(file, probe)| run_ephemeral_probe(&collector.kubectl, pod, probe, dir.join(file))),
    )
    .await;
}

async fn collect_agent_like(
    collector: Arc<Collector>,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
    folder: &str,
    connection_tests: bool,
) {
    let workload = match find_workload(&collector.client, kind, namespace, name).await {
        Ok(workload) => workload,
        Err(e) => {
            warn!(
                "Failed to find {} '{}' in '{}': {}",
                kind, name, namespace, e
            );
            return;
        }
    };

    let path_for_workload = collector.root.join(folder);
    collect_workload_basics(&collector, &workload, &path_for_workload).await;

    for_each_pod(&collector.client, &workload, |pod, _| {
        let collector = collector.clone();
        let path_for_pod = path_for_workload.join("pods").join(&pod.name);
        async move {
            let port = identify_agent_port(&pod);
            let tests = async {
                if connection_tests {
                    run_connection_tests(&collector, &pod, &path_for_pod).await;
                }
            };
            tokio::join!(
                collect_pod_basics(&collector, &pod, &path_for_pod, 10),
                sample_pod_endpoints(&collector, &pod, port, agent_endpoints(), &path_for_pod),
                tests,
            );
        }
    })
    .await;
}

/// Agent daemon set and outpost stateful set, each skipped on its own when missing.
pub async fn collect_agents(collector: Arc<Collector>) {
    let config = collector.config.clone();
    tokio::join!(
        collect_agent_like(
            collector.clone(),
            WorkloadKind::DaemonSet,
            &config.agent.namespace,
            &config.agent.daemon_set,
            "agent",
            false,
        ),
        collect_agent_like(
            collector.clone(),
            WorkloadKind::StatefulSet,
            &config.outpost.namespace,
            &config.outpost.stateful_set,
            "outpost",
            true,
        ),
    );
}
