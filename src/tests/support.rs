use crate::collect::Collector;
use crate::config::{Config, TlsConfig};
use crate::kubectl::Kubectl;
use crate::output::OutputRecord;
use crate::sampler::HttpSampler;
use serde_json::{Value, json};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn read_record(path: &Path) -> OutputRecord {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("reading {}: {}", path.display(), e));
    OutputRecord::parse(&text).unwrap_or_else(|| panic!("not a record: {}", text))
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

/// Stands in for kubectl: port-forward reports `local_port`, anything else echoes its arguments.
pub fn fake_kubectl(dir: &Path, local_port: u16) -> PathBuf {
    write_script(
        dir,
        "kubectl",
        &format!(
            r#"if [ "$1" = "port-forward" ]; then
  echo "Forwarding from 127.0.0.1:{} -> 8080"
  exec sleep 60
fi
echo "kubectl $*""#,
            local_port
        ),
    )
}

pub fn client_for(url: &str) -> kube::Client {
    let config = kube::Config::new(url.parse().unwrap());
    kube::Client::try_from(config).unwrap()
}

pub fn collector(client: kube::Client, config: Config, root: PathBuf) -> Arc<Collector> {
    Arc::new(Collector {
        client,
        kubectl: Kubectl::new(&config.kubernetes),
        sampler: HttpSampler::new(&TlsConfig::default()).unwrap(),
        config: Arc::new(config),
        root,
    })
}

pub fn list(api_version: &str, kind: &str, items: Vec<Value>) -> String {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": { "resourceVersion": "1" },
        "items": items,
    })
    .to_string()
}

pub fn not_found(name: &str) -> String {
    json!({
        "apiVersion": "v1",
        "kind": "Status",
        "metadata": {},
        "status": "Failure",
        "message": format!("\"{}\" not found", name),
        "reason": "NotFound",
        "code": 404,
    })
    .to_string()
}

pub fn pod(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "containers": [{ "name": "main", "image": "busybox" }] },
    })
}
