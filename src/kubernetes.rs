use crate::config::KubernetesConfig;
use crate::fanout::fork_join;
use crate::types::{PodSnapshot, Workload, WorkloadKind};
use crate::utils::{labels_to_query, selector_to_query};
use futures::future::join_all;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, ResourceExt, config};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use tracing::{debug, info, warn};

trait AsWorkload {
    const KIND: WorkloadKind;

    fn selector_query(&self) -> Option<String>;

    /// Annotations that describe the workload's pods.
    fn workload_annotations(&self) -> BTreeMap<String, String>;
}

impl AsWorkload for Deployment {
    const KIND: WorkloadKind = WorkloadKind::Deployment;

    fn selector_query(&self) -> Option<String> {
        self.spec.as_ref().and_then(|s| selector_to_query(&s.selector))
    }

    fn workload_annotations(&self) -> BTreeMap<String, String> {
        self.annotations().clone()
    }
}

impl AsWorkload for StatefulSet {
    const KIND: WorkloadKind = WorkloadKind::StatefulSet;

    fn selector_query(&self) -> Option<String> {
        self.spec.as_ref().and_then(|s| selector_to_query(&s.selector))
    }

    fn workload_annotations(&self) -> BTreeMap<String, String> {
        self.annotations().clone()
    }
}

impl AsWorkload for DaemonSet {
    const KIND: WorkloadKind = WorkloadKind::DaemonSet;

    fn selector_query(&self) -> Option<String> {
        self.spec.as_ref().and_then(|s| selector_to_query(&s.selector))
    }

    fn workload_annotations(&self) -> BTreeMap<String, String> {
        self.spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default()
    }
}

impl AsWorkload for Service {
    const KIND: WorkloadKind = WorkloadKind::Service;

    fn selector_query(&self) -> Option<String> {
        self.spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .and_then(labels_to_query)
    }

    fn workload_annotations(&self) -> BTreeMap<String, String> {
        self.annotations().clone()
    }
}

fn to_workload<T>(resource: &T, namespace: &str) -> Workload
where
    T: AsWorkload + ResourceExt,
{
    Workload {
        kind: T::KIND,
        namespace: resource.namespace().unwrap_or_else(|| namespace.to_string()),
        name: resource.name_any(),
        selector: resource.selector_query(),
        annotations: resource.workload_annotations(),
    }
}

async fn find_workload_generic<T>(
    client: &Client,
    namespace: &str,
    name: &str,
) -> anyhow::Result<Workload>
where
    T: k8s_openapi::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + k8s_openapi::Metadata<Ty = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta>
        + AsWorkload
        + serde::de::DeserializeOwned
        + Clone
        + Debug,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let resource = api.get(name).await?;
    Ok(to_workload(&resource, namespace))
}

pub async fn find_workload(
    client: &Client,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
) -> anyhow::Result<Workload> {
    match kind {
        WorkloadKind::Deployment => {
            find_workload_generic::<Deployment>(client, namespace, name).await
        }
        WorkloadKind::DaemonSet => find_workload_generic::<DaemonSet>(client, namespace, name).await,
        WorkloadKind::StatefulSet => {
            find_workload_generic::<StatefulSet>(client, namespace, name).await
        }
        WorkloadKind::Service => find_workload_generic::<Service>(client, namespace, name).await,
    }
}

pub async fn list_namespaces(client: &Client) -> anyhow::Result<Vec<String>> {
    let api: Api<Namespace> = Api::all(client.clone());
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(|ns| ns.name_any()).collect())
}

/// Services annotated with `annotation`, and daemon sets whose pod template carries it.
async fn find_annotated_in_namespace(
    client: &Client,
    namespace: &str,
    annotation: &str,
) -> anyhow::Result<Vec<Workload>> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let daemon_sets: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);

    let mut result = Vec::new();
    for service in services.list(&ListParams::default()).await? {
        if service.annotations().contains_key(annotation) {
            result.push(to_workload(&service, namespace));
        }
    }
    for daemon_set in daemon_sets.list(&ListParams::default()).await? {
        if daemon_set.workload_annotations().contains_key(annotation) {
            result.push(to_workload(&daemon_set, namespace));
        }
    }
    Ok(result)
}

/// Scans every namespace. A namespace that cannot be listed is skipped.
pub async fn find_annotated_workloads(
    client: &Client,
    annotation: &str,
) -> anyhow::Result<Vec<Workload>> {
    let namespaces = list_namespaces(client).await?;
    if namespaces.is_empty() {
        warn!("No namespaces found");
        return Ok(Vec::new());
    }

    let scans = namespaces.iter().map(|ns| async move {
        match find_annotated_in_namespace(client, ns, annotation).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    "Failed to find annotated services or daemon sets in namespace '{}': {}",
                    ns, e
                );
                Vec::new()
            }
        }
    });
    Ok(join_all(scans).await.into_iter().flatten().collect())
}

pub async fn list_pods(client: &Client, workload: &Workload) -> anyhow::Result<Vec<PodSnapshot>> {
    let Some(selector) = &workload.selector else {
        debug!(
            "[{}/{}] {} has no selector, no pods to collect",
            workload.namespace, workload.name, workload.kind
        );
        return Ok(Vec::new());
    };
    let api: Api<Pod> = Api::namespaced(client.clone(), &workload.namespace);
    let pods = api.list(&ListParams::default().labels(selector)).await?;
    Ok(pods.items.iter().map(PodSnapshot::from).collect())
}

/// Runs `work` once per pod of `workload`, all concurrently, and waits for every one.
/// If the pods cannot be listed nothing runs.
pub async fn for_each_pod<F, Fut>(client: &Client, workload: &Workload, work: F)
where
    F: Fn(PodSnapshot, usize) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let pods = match list_pods(client, workload).await {
        Ok(pods) => pods,
        Err(e) => {
            info!(
                "Failed to find pods in namespace '{}' for selector '{}'. Got error: {}",
                workload.namespace,
                workload.selector.as_deref().unwrap_or_default(),
                e
            );
            return;
        }
    };

    let scope = format!("{}/{}", workload.namespace, workload.name);
    let units = pods
        .into_iter()
        .enumerate()
        .map(|(idx, pod)| (pod.name.clone(), work(pod, idx)));
    fork_join(&scope, units).await;
}

pub async fn list_nodes(client: &Client) -> anyhow::Result<Vec<String>> {
    let api: Api<Node> = Api::all(client.clone());
    let nodes = api.list(&ListParams::default()).await?;
    Ok(nodes.items.iter().map(|n| n.name_any()).collect())
}

pub async fn create_client(cfg: &KubernetesConfig) -> anyhow::Result<Client> {
    let options = KubeConfigOptions {
        context: cfg.context.clone(),
        ..Default::default()
    };
    let kube_config = match &cfg.kube_config_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            config::Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        None if cfg.context.is_some() => config::Config::from_kubeconfig(&options).await?,
        None => config::Config::infer().await?,
    };

    let client = Client::try_from(kube_config)?;
    match client.apiserver_version().await {
        Ok(info) => info!("Cluster connected! Kubernetes Server Version {}", info.git_version),
        Err(e) => warn!("Could not fetch server version: {}", e),
    }
    Ok(client)
}
