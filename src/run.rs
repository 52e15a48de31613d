use crate::agent::collect_agents;
use crate::collect::Collector;
use crate::extensions::collect_extensions;
use crate::fanout::fork_join;
use crate::nodes::collect_nodes;
use crate::platform::{collect_platform, collect_platform_port_splitter};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::info;

/// Runs all top-level branches concurrently. A branch that finds nothing, or
/// fails, leaves the others untouched.
pub async fn gather_information(collector: Arc<Collector>) {
    let branches: Vec<(String, BoxFuture<'static, ()>)> = vec![
        ("platform".to_string(), Box::pin(collect_platform(collector.clone()))),
        (
            "platform-port-splitter".to_string(),
            Box::pin(collect_platform_port_splitter(collector.clone())),
        ),
        ("agent".to_string(), Box::pin(collect_agents(collector.clone()))),
        ("nodes".to_string(), Box::pin(collect_nodes(collector.clone()))),
        (
            "extensions".to_string(),
            Box::pin(collect_extensions(collector.clone())),
        ),
    ];
    fork_join("run", branches).await;
    info!("Finished gathering debugging information");
}
