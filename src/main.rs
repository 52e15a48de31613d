mod agent;
mod cli;
mod collect;
mod config;
mod ephemeral;
mod extensions;
mod fanout;
mod kubectl;
mod kubernetes;
mod nodes;
mod output;
mod platform;
mod run;
mod sampler;
mod tunnel;
mod types;
mod utils;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, warn};

use cli::Cli;
use collect::Collector;
use config::Config;
use kubectl::Kubectl;
use sampler::HttpSampler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = collect_debugging_information(&cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Only setup, archive and output directory failures end up here; everything
/// that goes wrong while collecting is recorded in the output instead.
async fn collect_debugging_information(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?.apply_cli(cli);
    let root = output::create_output_directory(&config.output_path, config.no_cleanup).await?;
    output::add_json_output(&root.join("debugging_config.yaml"), &config).await;
    let config = Arc::new(config);

    match kubernetes::create_client(&config.kubernetes).await {
        Ok(client) => {
            let collector = Arc::new(Collector {
                client,
                kubectl: Kubectl::new(&config.kubernetes),
                sampler: HttpSampler::new(&config.tls)?,
                config: config.clone(),
                root: root.clone(),
            });
            run::gather_information(collector).await;
        }
        Err(e) => error!("Could not create kubernetes client: {:#}", e),
    }

    output::archive_output_directory(&root).await?;

    if !config.no_cleanup
        && let Err(e) = tokio::fs::remove_dir_all(&root).await
    {
        warn!(
            "Failed to remove output directory '{}' after completion: {}",
            root.display(),
            e
        );
    }
    Ok(())
}
