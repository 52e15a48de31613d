use crate::config::KubernetesConfig;
use crate::output::CommandOutput;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Builds `kubectl` invocations against the same cluster the API client talks to.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    global_args: Vec<String>,
}

impl Kubectl {
    pub fn new(config: &KubernetesConfig) -> Self {
        let mut global_args = Vec::new();
        if let Some(path) = &config.kube_config_path {
            global_args.push("--kubeconfig".to_string());
            global_args.push(path.to_string_lossy().into_owned());
        }
        if let Some(ctx) = &config.context {
            global_args.push("--context".to_string());
            global_args.push(ctx.clone());
        }
        Kubectl {
            program: config.kubectl.clone(),
            global_args,
        }
    }

    pub fn args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args
            .iter()
            .cloned()
            .chain(args.into_iter().map(Into::into))
            .collect()
    }

    pub fn output<I, S>(&self, args: I, path: PathBuf) -> CommandOutput
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandOutput::new(self.program.clone(), self.args(args), path)
    }

    fn scoped(namespace: Option<&str>, rest: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    pub fn describe(&self, kind: &str, namespace: Option<&str>, name: &str, path: PathBuf) -> CommandOutput {
        let mut args = vec!["describe".to_string(), kind.to_string()];
        args.extend(Self::scoped(namespace, &[name]));
        self.output(args, path)
    }

    pub fn get_yaml(&self, kind: &str, namespace: Option<&str>, name: &str, path: PathBuf) -> CommandOutput {
        let mut args = vec!["get".to_string(), kind.to_string()];
        args.extend(Self::scoped(namespace, &["-o", "yaml", name]));
        self.output(args, path)
    }

    pub fn logs(&self, namespace: &str, pod: &str, previous: bool, path: PathBuf) -> CommandOutput {
        let mut rest = Vec::with_capacity(3);
        if previous {
            rest.push("--previous");
        }
        rest.push("--all-containers");
        rest.push(pod);

        let mut args = vec!["logs".to_string()];
        args.extend(Self::scoped(Some(namespace), &rest));
        self.output(args, path)
    }

    /// `path` must contain `%d`.
    pub fn top(&self, namespace: &str, pod: &str, executions: usize, path: PathBuf) -> CommandOutput {
        let mut args = vec!["top".to_string(), "pod".to_string()];
        args.extend(Self::scoped(Some(namespace), &["--containers", pod]));
        self.output(args, path)
            .repeated(executions, Duration::from_millis(500))
    }

    /// Binds an ephemeral local port; the chosen port is reported on stdout.
    pub fn port_forward(&self, namespace: &str, pod: &str, port: u16) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args([
            "port-forward".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            format!("pod/{}", pod),
            format!(":{}", port),
        ]));
        command
    }

    /// Attaches an ephemeral debug container to `pod` and runs `command` in it.
    #[allow(clippy::too_many_arguments)]
    pub fn debug(
        &self,
        namespace: &str,
        pod: &str,
        target_container: Option<&str>,
        container_name: &str,
        image: &str,
        command: &[String],
        path: PathBuf,
    ) -> CommandOutput {
        let mut args = vec![
            "debug".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            pod.to_string(),
            "-i".to_string(),
            "--quiet".to_string(),
            format!("--image={}", image),
            format!("--container={}", container_name),
        ];
        if let Some(target) = target_container {
            args.push(format!("--target={}", target));
        }
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        self.output(args, path)
    }
}
