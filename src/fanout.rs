use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Spawns every unit and waits for all of them. A unit that panics is logged
/// under its label; it never affects its siblings.
pub async fn fork_join<I, Fut>(scope: &str, units: I)
where
    I: IntoIterator<Item = (String, Fut)>,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    let mut labels = HashMap::new();
    for (label, unit) in units {
        let handle = tasks.spawn(unit);
        labels.insert(handle.id(), label);
    }
    debug!("[{}] Waiting for {} task(s)", scope, labels.len());

    while let Some(result) = tasks.join_next_with_id().await {
        if let Err(e) = result {
            let label = labels.get(&e.id()).map(String::as_str).unwrap_or("?");
            warn!("[{}] Task for {} failed: {}", scope, label, e);
        }
    }
}
