use crate::collect::Collector;
use crate::fanout::fork_join;
use crate::kubernetes::list_nodes;
use std::sync::Arc;
use tracing::info;

pub async fn collect_nodes(collector: Arc<Collector>) {
    let nodes = match list_nodes(&collector.client).await {
        Ok(nodes) => nodes,
        Err(e) => {
            info!("Failed to find nodes. Got error: {}", e);
            return;
        }
    };

    let path_for_nodes = collector.root.join("nodes");
    let units = nodes.into_iter().map(|node| {
        let collector = collector.clone();
        let path_for_node = path_for_nodes.join(&node);
        (node.clone(), async move {
            tokio::join!(
                collector
                    .kubectl
                    .describe("node", None, &node, path_for_node.join("description.txt"))
                    .run(),
                collector
                    .kubectl
                    .get_yaml("node", None, &node, path_for_node.join("config.yaml"))
                    .run(),
            );
        })
    });
    fork_join("nodes", units).await;
}
