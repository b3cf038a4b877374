use haplog::{DemoServer, HaConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let config = HaConfig::default();
    tracing::info!(node_id = config.node.node_id, "starting haplog node");

    let server = Arc::new(DemoServer::new(config).await?);
    server.start().await?;

    Ok(())
}
