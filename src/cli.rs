use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "steadybit-debug")]
#[command(about = "Collect debugging information about a Steadybit installation into an archive")]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, default_value = "steadybit-debug.yml")]
    pub config: PathBuf,

    /// Path to output directory that will contain the debugging information
    #[arg(short = 'o', long = "output")]
    pub output_path: Option<PathBuf>,

    /// Skip output directory deletion on command completion
    #[arg(long)]
    pub no_cleanup: bool,

    /// Path to Kubernetes config
    #[arg(long = "kube-config")]
    pub kube_config: Option<PathBuf>,

    /// Kubeconfig context
    #[arg(long)]
    pub context: Option<String>,

    /// kubectl binary used for describe, logs, port-forward and debug containers
    #[arg(long)]
    pub kubectl: Option<String>,

    /// Kubernetes deployment name of the Steadybit platform
    #[arg(long)]
    pub platform_deployment: Option<String>,

    /// Kubernetes namespace name of the Steadybit platform
    #[arg(long)]
    pub platform_namespace: Option<String>,

    /// Export database
    #[arg(long)]
    pub export_database: bool,

    /// Kubernetes deployment name of the Steadybit platform splitter
    #[arg(long)]
    pub platform_splitter_deployment: Option<String>,

    /// Kubernetes namespace name of the Steadybit platform splitter
    #[arg(long)]
    pub platform_splitter_namespace: Option<String>,

    /// Kubernetes daemon set name of the Steadybit agent
    #[arg(long)]
    pub agent_daemon_set: Option<String>,

    /// Kubernetes namespace name of the Steadybit agent
    #[arg(long)]
    pub agent_namespace: Option<String>,

    /// Kubernetes stateful set name of the Steadybit outpost
    #[arg(long)]
    pub outpost_stateful_set: Option<String>,

    /// Kubernetes namespace name of the Steadybit outpost
    #[arg(long)]
    pub outpost_namespace: Option<String>,

    /// Image to use for connection testing with curl installed
    #[arg(long)]
    pub outpost_curl_image: Option<String>,

    /// Image to use for connection testing with websocat installed
    #[arg(long)]
    pub outpost_websocat_image: Option<String>,

    /// Image to use for connection testing with traceroute installed
    #[arg(long)]
    pub outpost_traceroute_image: Option<String>,

    /// Path to the certificate chain file
    #[arg(long)]
    pub cert_chain_file: Option<PathBuf>,

    /// Path to the certificate key file
    #[arg(long)]
    pub cert_key_file: Option<PathBuf>,

    /// Seconds to wait for a port-forward to report its local port
    #[arg(long)]
    pub tunnel_timeout: Option<u64>,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
