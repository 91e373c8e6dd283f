// ABOUTME: `node` command: supervise the chain node with flow control behind a control endpoint
//
// The node is started right away. When RELAY_CONTROL is set, every new epoch
// pauses that relay through its HTTP control endpoint.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::util::{bind_control, shutdown_signal};
use super::NodeArgs;
use syncgate::control::{serve, ControlledService, ServiceRegistry};
use syncgate::services::NodeService;
use syncgate::sync::{PauseTarget, RemoteRelay};

const DEFAULT_PORT: u16 = 25551;

/// Timeout for a single pause request to the relay
const PAUSE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute the node command
pub async fn execute(args: NodeArgs) -> Result<()> {
    let pause_target = match &args.relay_control {
        Some(url) => {
            let relay = RemoteRelay::new(url, PAUSE_REQUEST_TIMEOUT).context("Invalid RELAY_CONTROL")?;
            info!(pause_url = %relay.pause_url(), "Epoch changes will pause the remote relay");
            Some(Arc::new(relay) as Arc<dyn PauseTarget>)
        }
        None => {
            info!("No RELAY_CONTROL configured, epoch changes are only logged");
            None
        }
    };

    let node = Arc::new(
        NodeService::spawn(args.node.options(pause_target)?).context("Failed to set up node service")?,
    );
    let listener = bind_control(&args.control, DEFAULT_PORT).await?;

    if let Err(e) = node.start().await {
        error!(error = %e, "Failed to start node");
    }

    let registry = ServiceRegistry::new().with("node", Arc::clone(&node) as Arc<dyn ControlledService>);
    serve(listener, &registry, shutdown_signal())
        .await
        .context("Control endpoint failed")?;

    node.shutdown().await.context("Failed to stop node")?;
    Ok(())
}
