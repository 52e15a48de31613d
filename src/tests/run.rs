use super::support::{client_for, collector, fake_kubectl, list, not_found, pod, read_record};
use crate::config::Config;
use crate::extensions::collect_extensions;
use crate::kubernetes::{find_annotated_workloads, find_workload, for_each_pod};
use crate::run::gather_information;
use crate::types::{Workload, WorkloadKind};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::extensions::EXTENSION_AUTO_DISCOVERY_ANNOTATION as ANNOTATION;

fn regex(pattern: &str) -> Matcher {
    Matcher::Regex(pattern.to_string())
}

fn workload(selector: Option<&str>) -> Workload {
    Workload {
        kind: WorkloadKind::Deployment,
        namespace: "ns".to_string(),
        name: "app".to_string(),
        selector: selector.map(str::to_string),
        annotations: BTreeMap::new(),
    }
}

async fn mock_namespaces(server: &mut ServerGuard, names: &[&str]) {
    let items = names
        .iter()
        .map(|n| json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": n}}))
        .collect();
    server
        .mock("GET", regex(r"^/api/v1/namespaces(\?.*)?$"))
        .with_body(list("v1", "NamespaceList", items))
        .create_async()
        .await;
}

#[tokio::test]
async fn test_find_service_workload() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", regex(r"^/api/v1/namespaces/ext/services/extension-http"))
        .with_body(
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {
                    "name": "extension-http",
                    "namespace": "ext",
                    "annotations": {"steadybit.com/extension-auto-discovery": "{}"}
                },
                "spec": {"selector": {"app": "extension-http", "tier": "ext"}}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server.url());
    let found = find_workload(&client, WorkloadKind::Service, "ext", "extension-http")
        .await
        .unwrap();
    assert_eq!(found.kind, WorkloadKind::Service);
    assert_eq!(found.selector.as_deref(), Some("app=extension-http,tier=ext"));
    assert!(found.annotations.contains_key(ANNOTATION));
}

#[tokio::test]
async fn test_find_missing_workload() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", regex(r"^/apis/apps/v1/namespaces/sb/daemonsets/steadybit-agent"))
        .with_status(404)
        .with_body(not_found("steadybit-agent"))
        .create_async()
        .await;

    let client = client_for(&server.url());
    assert!(
        find_workload(&client, WorkloadKind::DaemonSet, "sb", "steadybit-agent")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_find_annotated_workloads() {
    let mut server = Server::new_async().await;
    mock_namespaces(&mut server, &["ext", "broken"]).await;
    server
        .mock("GET", regex(r"^/api/v1/namespaces/ext/services"))
        .with_body(list(
            "v1",
            "ServiceList",
            vec![
                json!({
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": {"name": "annotated", "namespace": "ext", "annotations": {"steadybit.com/extension-auto-discovery": "{}"}},
                    "spec": {"selector": {"app": "annotated"}}
                }),
                json!({
                    "apiVersion": "v1",
                    "kind": "Service",
                    "metadata": {"name": "plain", "namespace": "ext"},
                    "spec": {"selector": {"app": "plain"}}
                }),
            ],
        ))
        .create_async()
        .await;
    server
        .mock("GET", regex(r"^/apis/apps/v1/namespaces/ext/daemonsets"))
        .with_body(list(
            "apps/v1",
            "DaemonSetList",
            vec![json!({
                "apiVersion": "apps/v1",
                "kind": "DaemonSet",
                "metadata": {"name": "extension-host", "namespace": "ext"},
                "spec": {
                    "selector": {"matchLabels": {"app": "extension-host"}},
                    "template": {"metadata": {"annotations": {"steadybit.com/extension-auto-discovery": "{}"}}}
                }
            })],
        ))
        .create_async()
        .await;

    let client = client_for(&server.url());
    let mut found = find_annotated_workloads(&client, ANNOTATION).await.unwrap();
    found.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<_> = found.iter().map(|w| (w.kind, w.name.as_str())).collect();
    assert_eq!(
        names,
        vec![
            (WorkloadKind::Service, "annotated"),
            (WorkloadKind::DaemonSet, "extension-host"),
        ]
    );
    assert_eq!(found[1].selector.as_deref(), Some("app=extension-host"));
}

#[tokio::test]
async fn test_for_each_pod_runs_once_per_pod() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", regex(r"^/api/v1/namespaces/ns/pods"))
        .with_body(list(
            "v1",
            "PodList",
            vec![pod("ns", "app-0"), pod("ns", "app-1"), pod("ns", "app-2")],
        ))
        .create_async()
        .await;

    let client = client_for(&server.url());
    let seen = Arc::new(Mutex::new(Vec::new()));
    for_each_pod(&client, &workload(Some("app=app")), |pod, idx| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push((idx, pod.name));
        }
    })
    .await;

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (0, "app-0".to_string()),
            (1, "app-1".to_string()),
            (2, "app-2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_for_each_pod_without_selector_or_pods() {
    let server = Server::new_async().await;
    let client = client_for(&server.url());
    let calls = Arc::new(Mutex::new(0));

    for selector in [None, Some("app=unreachable")] {
        for_each_pod(&client, &workload(selector), |_, _| {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
            }
        })
        .await;
    }
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_branches_are_isolated() {
    let mut server = Server::new_async().await;
    server
        .mock(
            "GET",
            regex(r"^/apis/apps/v1/namespaces/steadybit-platform/deployments/steadybit-platform"),
        )
        .with_body(
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "steadybit-platform", "namespace": "steadybit-platform"},
                "spec": {"selector": {"matchLabels": {"app": "platform"}}, "template": {}}
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", regex(r"^/api/v1/namespaces/[^/]+/pods"))
        .with_body(list("v1", "PodList", vec![]))
        .create_async()
        .await;
    server
        .mock("GET", regex(r"^/api/v1/nodes"))
        .with_body(list(
            "v1",
            "NodeList",
            vec![json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "node-a"}})],
        ))
        .create_async()
        .await;
    server
        .mock("GET", regex(r"^/apis/apps/v1/namespaces/[^/]+/(daemonsets|statefulsets)/"))
        .with_status(404)
        .with_body(not_found("missing"))
        .create_async()
        .await;
    mock_namespaces(&mut server, &[]).await;

    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.kubernetes.kubectl = "steadybit-debug-no-such-kubectl".to_string();
    let collector = collector(client_for(&server.url()), config, root.path().to_path_buf());

    gather_information(collector).await;

    let description = read_record(&root.path().join("platform/description.txt"));
    assert_eq!(description.errors.len(), 1);
    assert!(root.path().join("platform/config.yaml").exists());
    assert!(root.path().join("nodes/node-a/description.txt").exists());
    assert!(root.path().join("nodes/node-a/config.yaml").exists());
    assert!(!root.path().join("platform-port-splitter").exists());
    assert!(!root.path().join("agent").exists());
    assert!(!root.path().join("outpost").exists());
    assert!(!root.path().join("extensions").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_extension_is_sampled_per_port() {
    let mut server = Server::new_async().await;
    let scripts = tempfile::tempdir().unwrap();
    let kubectl = fake_kubectl(scripts.path(), server.socket_address().port());

    mock_namespaces(&mut server, &["ext"]).await;
    let discovery = json!({"extensions": [
        {"port": 8085},
        {"port": 8443, "tls": {"server": {"certChainFile": "/tls/tls.crt"}}}
    ]})
    .to_string();
    server
        .mock("GET", regex(r"^/api/v1/namespaces/ext/services"))
        .with_body(list(
            "v1",
            "ServiceList",
            vec![json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": "extension-http", "namespace": "ext", "annotations": {"steadybit.com/extension-auto-discovery": discovery}},
                "spec": {"selector": {"app": "extension-http"}}
            })],
        ))
        .create_async()
        .await;
    server
        .mock("GET", regex(r"^/apis/apps/v1/namespaces/ext/daemonsets"))
        .with_body(list("apps/v1", "DaemonSetList", vec![]))
        .create_async()
        .await;
    server
        .mock("GET", regex(r"^/api/v1/namespaces/ext/pods"))
        .with_body(list("v1", "PodList", vec![pod("ext", "extension-http-0")]))
        .create_async()
        .await;

    // The extension itself, reached through the fake port-forward.
    server
        .mock("GET", "/")
        .with_body(
            r#"{"actions": [{"method": "GET", "path": "/actions/stress"}],
                "discoveries": [{"method": "GET", "path": "/discovery/container"}]}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/actions/stress")
        .with_body(r#"{"id": "stress"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/discovery/container")
        .with_body(r#"{"id": "container", "discover": {"method": "GET", "path": "/discovery/container/targets"}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/discovery/container/targets")
        .with_body(r#"{"targets": []}"#)
        .create_async()
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.kubernetes.kubectl = kubectl.to_string_lossy().into_owned();
    let collector = collector(client_for(&server.url()), config, root.path().to_path_buf());

    collect_extensions(collector).await;

    let extension = root.path().join("extensions/ext/extension-http");
    let description = read_record(&extension.join("description.txt"));
    assert!(description.errors.is_empty());
    assert_eq!(description.body.trim(), "kubectl describe service -n ext extension-http");

    let pod = extension.join("pods/extension-http-0");
    assert!(pod.join("logs.txt").exists());
    assert!(pod.join("top.2.txt").exists());

    let http = pod.join("http");
    for file in [
        "GET__.yml",
        "GET__actions_stress.yml",
        "GET__discovery_container.yml",
        "GET__discovery_container_targets.yml",
    ] {
        let record = read_record(&http.join(file));
        assert!(record.errors.is_empty(), "{}: {:?}", file, record.errors);
    }

    // The mock only speaks plaintext, so the TLS pass records its failure.
    let https_index = read_record(&pod.join("https/GET__.yml"));
    assert_eq!(https_index.errors.len(), 1);
    assert!(https_index.command.starts_with("GET https://"));
}
