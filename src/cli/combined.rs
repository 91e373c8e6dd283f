// ABOUTME: `combined` command: node and relay in one process
//
// The node's flow controller pauses the in-process relay directly. Services are
// reachable under /node and /sync on one control endpoint.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::error;

use super::util::{bind_control, shutdown_signal};
use super::CombinedArgs;
use syncgate::control::{serve, ControlledService, ServiceRegistry};
use syncgate::relay::TcpRelay;
use syncgate::services::{NodeService, RelayService};
use syncgate::sync::PauseTarget;

const DEFAULT_PORT: u16 = 25551;

/// Execute the combined command
pub async fn execute(args: CombinedArgs) -> Result<()> {
    let relay: Arc<TcpRelay> = Arc::new(args.relay.relay()?);
    relay.start().await.context("Failed to start relay listeners")?;

    let pause_target = Arc::clone(&relay) as Arc<dyn PauseTarget>;
    let node = Arc::new(
        NodeService::spawn(args.node.options(Some(pause_target))?)
            .context("Failed to set up node service")?,
    );
    let listener = bind_control(&args.control, DEFAULT_PORT).await?;

    if let Err(e) = node.start().await {
        error!(error = %e, "Failed to start node");
    }

    let registry = ServiceRegistry::new()
        .with("node", Arc::clone(&node) as Arc<dyn ControlledService>)
        .with("sync", Arc::new(RelayService::new("sync", relay)) as Arc<dyn ControlledService>);

    serve(listener, &registry, shutdown_signal())
        .await
        .context("Control endpoint failed")?;

    node.shutdown().await.context("Failed to stop node")?;
    Ok(())
}
