use crate::kubectl::Kubectl;
use crate::types::PodSnapshot;
use std::path::PathBuf;
use std::time::Duration;

/// A network tool run from inside a pod's network namespace.
#[derive(Debug, Clone)]
pub struct EphemeralProbe {
    pub tool: String,
    pub image: String,
    pub command: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

/// Unique per invocation so a retry never collides with a previous container.
pub fn ephemeral_container_name(tool: &str) -> String {
    format!(
        "steadybit-debug-{}-{}",
        tool,
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

pub async fn run_ephemeral_probe(
    kubectl: &Kubectl,
    pod: &PodSnapshot,
    probe: &EphemeralProbe,
    output_path: PathBuf,
) {
    let container = ephemeral_container_name(&probe.tool);
    let mut output = kubectl
        .debug(
            &pod.namespace,
            &pod.name,
            pod.first_container(),
            &container,
            &probe.image,
            &probe.command,
            output_path,
        )
        .context(format!("{}/{}", pod.namespace, pod.name))
        .log_errors();
    if let Some(input) = &probe.stdin {
        output = output.stdin(input.clone());
    }
    if let Some(limit) = probe.timeout {
        output = output.timeout(limit);
    }
    output.run().await;
}
