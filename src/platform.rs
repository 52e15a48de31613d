use crate::collect::{
    Collector, collect_pod_basics, collect_workload_basics, download_from_pod,
    sample_pod_endpoints,
};
use crate::kubernetes::{find_workload, for_each_pod};
use crate::types::{EndpointSpec, WorkloadKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const PLATFORM_ACTUATOR_PORT: u16 = 9090;

pub fn platform_endpoints() -> Vec<EndpointSpec> {
    vec![
        EndpointSpec::get("/actuator/env", "env.yml"),
        EndpointSpec::get("/actuator/configprops", "configprops.yml"),
        EndpointSpec::get("/actuator/health", "health.yml"),
        EndpointSpec::get("/actuator/prometheus", "prometheus_metrics.%d.txt")
            .repeated(10, Duration::from_millis(500)),
        EndpointSpec::get("/actuator/threaddump", "threaddump.yml"),
        EndpointSpec::get("/actuator/info", "info.yml"),
        EndpointSpec::get("/actuator/targetstats", "target_stats.yml"),
    ]
}

pub async fn collect_platform(collector: Arc<Collector>) {
    let cfg = &collector.config.platform;
    let deployment = match find_workload(
        &collector.client,
        WorkloadKind::Deployment,
        &cfg.namespace,
        &cfg.deployment,
    )
    .await
    {
        Ok(deployment) => deployment,
        Err(e) => {
            warn!(
                "Failed to find platform deployment '{}' in '{}': {}",
                cfg.deployment, cfg.namespace, e
            );
            return;
        }
    };

    let path_for_platform = collector.root.join("platform");
    collect_workload_basics(&collector, &deployment, &path_for_platform).await;

    let export_database = cfg.export_database;
    for_each_pod(&collector.client, &deployment, |pod, idx| {
        let collector = collector.clone();
        let path_for_platform = path_for_platform.clone();
        async move {
            let path_for_pod = path_for_platform.join("pods").join(&pod.name);
            let export = async {
                if idx == 0 && export_database {
                    debug!("Downloading database export for platform {}", pod.name);
                    download_from_pod(
                        &collector,
                        &pod,
                        PLATFORM_ACTUATOR_PORT,
                        "/actuator/database/export",
                        path_for_platform.join("database.zip"),
                    )
                    .await;
                }
            };
            tokio::join!(
                export,
                collect_pod_basics(&collector, &pod, &path_for_pod, 10),
                sample_pod_endpoints(
                    &collector,
                    &pod,
                    PLATFORM_ACTUATOR_PORT,
                    platform_endpoints(),
                    &path_for_pod,
                ),
            );
        }
    })
    .await;
}

pub async fn collect_platform_port_splitter(collector: Arc<Collector>) {
    let cfg = &collector.config.platform_port_splitter;
    let deployment = match find_workload(
        &collector.client,
        WorkloadKind::Deployment,
        &cfg.namespace,
        &cfg.deployment,
    )
    .await
    {
        Ok(deployment) => deployment,
        Err(e) => {
            warn!(
                "Failed to find platform port splitter deployment '{}' in '{}': {}",
                cfg.deployment, cfg.namespace, e
            );
            return;
        }
    };

    let path_for_splitter = collector.root.join("platform-port-splitter");
    collect_workload_basics(&collector, &deployment, &path_for_splitter).await;

    for_each_pod(&collector.client, &deployment, |pod, _| {
        let collector = collector.clone();
        let path_for_pod = path_for_splitter.join("pods").join(&pod.name);
        async move {
            collect_pod_basics(&collector, &pod, &path_for_pod, 5).await;
        }
    })
    .await;
}
