use crate::cli::Cli;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub output_path: PathBuf,
    pub no_cleanup: bool,
    pub kubernetes: KubernetesConfig,
    pub platform: PlatformConfig,
    #[serde(rename = "platform-port-splitter")]
    pub platform_port_splitter: PlatformPortSplitterConfig,
    pub agent: AgentConfig,
    pub outpost: OutpostConfig,
    pub tls: TlsConfig,
    pub tunnel_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesConfig {
    pub kube_config_path: Option<PathBuf>,
    pub context: Option<String>,
    pub kubectl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformConfig {
    pub deployment: String,
    pub namespace: String,
    pub export_database: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformPortSplitterConfig {
    pub deployment: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub daemon_set: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutpostConfig {
    pub stateful_set: String,
    pub namespace: String,
    pub curl_image: String,
    pub websocat_image: String,
    pub traceroute_image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    pub cert_chain_file: Option<PathBuf>,
    pub cert_key_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Both files must be set for a client certificate to be presented.
    pub fn client_certificate(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_chain_file, &self.cert_key_file) {
            (Some(chain), Some(key)) => Some((chain.as_path(), key.as_path())),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let output_path = std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir());
        Config {
            output_path,
            no_cleanup: false,
            kubernetes: KubernetesConfig::default(),
            platform: PlatformConfig::default(),
            platform_port_splitter: PlatformPortSplitterConfig::default(),
            agent: AgentConfig::default(),
            outpost: OutpostConfig::default(),
            tls: TlsConfig::default(),
            tunnel_timeout_seconds: 30,
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        KubernetesConfig {
            kube_config_path: None,
            context: None,
            kubectl: "kubectl".to_string(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            deployment: "steadybit-platform".to_string(),
            namespace: "steadybit-platform".to_string(),
            export_database: false,
        }
    }
}

impl Default for PlatformPortSplitterConfig {
    fn default() -> Self {
        PlatformPortSplitterConfig {
            deployment: "platform-port-splitter".to_string(),
            namespace: "steadybit-platform".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            daemon_set: "steadybit-agent".to_string(),
            namespace: "steadybit-agent".to_string(),
        }
    }
}

impl Default for OutpostConfig {
    fn default() -> Self {
        OutpostConfig {
            stateful_set: "steadybit-outpost".to_string(),
            namespace: "steadybit-outpost".to_string(),
            curl_image: "curlimages/curl".to_string(),
            websocat_image: "mtilson/websocat".to_string(),
            traceroute_image: "alpine".to_string(),
        }
    }
}

impl Config {
    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_timeout_seconds)
    }

    /// Defaults, then the YAML file at `path` if it exists.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No steadybit-debug configuration file found at path '{}'. Will continue with default configuration.",
                    path.display()
                );
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to load steadybit-debug configuration file from path '{}'",
                        path.display()
                    )
                });
            }
        };
        Config::from_yaml(&content).with_context(|| {
            format!(
                "Failed to parse steadybit-debug configuration from path '{}' as YAML",
                path.display()
            )
        })
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Config> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Command-line flags win over file values.
    pub fn apply_cli(mut self, cli: &Cli) -> Config {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut self.output_path, &cli.output_path);
        self.no_cleanup |= cli.no_cleanup;
        if cli.kube_config.is_some() {
            self.kubernetes.kube_config_path = cli.kube_config.clone();
        }
        if cli.context.is_some() {
            self.kubernetes.context = cli.context.clone();
        }
        set(&mut self.kubernetes.kubectl, &cli.kubectl);
        set(&mut self.platform.deployment, &cli.platform_deployment);
        set(&mut self.platform.namespace, &cli.platform_namespace);
        self.platform.export_database |= cli.export_database;
        set(
            &mut self.platform_port_splitter.deployment,
            &cli.platform_splitter_deployment,
        );
        set(
            &mut self.platform_port_splitter.namespace,
            &cli.platform_splitter_namespace,
        );
        set(&mut self.agent.daemon_set, &cli.agent_daemon_set);
        set(&mut self.agent.namespace, &cli.agent_namespace);
        set(&mut self.outpost.stateful_set, &cli.outpost_stateful_set);
        set(&mut self.outpost.namespace, &cli.outpost_namespace);
        set(&mut self.outpost.curl_image, &cli.outpost_curl_image);
        set(&mut self.outpost.websocat_image, &cli.outpost_websocat_image);
        set(
            &mut self.outpost.traceroute_image,
            &cli.outpost_traceroute_image,
        );
        if cli.cert_chain_file.is_some() {
            self.tls.cert_chain_file = cli.cert_chain_file.clone();
        }
        if cli.cert_key_file.is_some() {
            self.tls.cert_key_file = cli.cert_key_file.clone();
        }
        set(&mut self.tunnel_timeout_seconds, &cli.tunnel_timeout);
        self
    }
}
