use crate::config::Config;
use crate::fanout::fork_join;
use crate::kubectl::Kubectl;
use crate::sampler::{HttpSampler, SampleTarget};
use crate::tunnel::Tunnel;
use crate::types::{EndpointSpec, PodSnapshot, Workload};
use kube::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

/// Everything a unit of work needs, shared read-only by all of them.
pub struct Collector {
    pub client: Client,
    pub kubectl: Kubectl,
    pub sampler: HttpSampler,
    pub config: Arc<Config>,
    pub root: PathBuf,
}

/// `description.txt` and `config.yaml` of the workload itself.
pub async fn collect_workload_basics(collector: &Collector, workload: &Workload, path: &Path) {
    let kind = workload.kind.as_kubectl();
    let ns = Some(workload.namespace.as_str());
    tokio::join!(
        collector
            .kubectl
            .describe(kind, ns, &workload.name, path.join("description.txt"))
            .run(),
        collector
            .kubectl
            .get_yaml(kind, ns, &workload.name, path.join("config.yaml"))
            .run(),
    );
}

/// Description, manifest, logs and `top_executions` resource usage samples of a pod.
pub async fn collect_pod_basics(
    collector: &Collector,
    pod: &PodSnapshot,
    path: &Path,
    top_executions: usize,
) {
    let kubectl = &collector.kubectl;
    let ns = Some(pod.namespace.as_str());
    tokio::join!(
        kubectl
            .describe("pod", ns, &pod.name, path.join("description.txt"))
            .run(),
        kubectl
            .get_yaml("pod", ns, &pod.name, path.join("config.yml"))
            .run(),
        kubectl
            .logs(&pod.namespace, &pod.name, false, path.join("logs.txt"))
            .run(),
        kubectl
            .logs(&pod.namespace, &pod.name, true, path.join("logs_previous.txt"))
            .run(),
        kubectl
            .top(&pod.namespace, &pod.name, top_executions, path.join("top.%d.txt"))
            .run(),
    );
}

/// Opens one tunnel to `port` and samples all `endpoints` through it concurrently.
pub async fn sample_pod_endpoints(
    collector: &Collector,
    pod: &PodSnapshot,
    port: u16,
    endpoints: Vec<EndpointSpec>,
    path: &Path,
) {
    let context = format!("{}/{}", pod.namespace, pod.name);
    let tunnel = match Tunnel::open(
        &collector.kubectl,
        &pod.namespace,
        &pod.name,
        port,
        collector.config.tunnel_timeout(),
    )
    .await
    {
        Ok(tunnel) => tunnel,
        Err(e) => {
            error!("[{}] Failed to port-forward to port {}: {}", context, port, e);
            return;
        }
    };

    tunnel
        .scoped(|address| async move {
            let target = SampleTarget::new(&address, false, context);
            let units = endpoints.into_iter().map(|spec| {
                let sampler = collector.sampler.clone();
                let target = target.clone();
                let dir = path.to_path_buf();
                (spec.output.clone(), async move {
                    sampler.sample_to_file(&target, &spec, &dir, true).await;
                })
            });
            fork_join(&target.context, units).await;
        })
        .await;
}

/// Downloads a binary artifact from the pod through its own tunnel.
pub async fn download_from_pod(
    collector: &Collector,
    pod: &PodSnapshot,
    port: u16,
    path: &str,
    output_path: PathBuf,
) {
    let context = format!("{}/{}", pod.namespace, pod.name);
    let tunnel = match Tunnel::open(
        &collector.kubectl,
        &pod.namespace,
        &pod.name,
        port,
        collector.config.tunnel_timeout(),
    )
    .await
    {
        Ok(tunnel) => tunnel,
        Err(e) => {
            error!("[{}] Failed to port-forward to port {}: {}", context, port, e);
            return;
        }
    };

    tunnel
        .scoped(|address| async move {
            let target = SampleTarget::new(&address, false, context);
            collector
                .sampler
                .download_to_file(&target, "GET", path, &output_path)
                .await;
        })
        .await;
}
