// ABOUTME: `relay` command: multi-target TCP relay with pause/drain behind a control endpoint

use anyhow::{Context, Result};
use std::sync::Arc;

use super::util::{bind_control, shutdown_signal};
use super::RelayArgs;
use syncgate::control::{serve, ControlledService, ServiceRegistry};
use syncgate::services::RelayService;

const DEFAULT_PORT: u16 = 25552;

/// Execute the relay command
pub async fn execute(args: RelayArgs) -> Result<()> {
    let relay = Arc::new(args.relay.relay()?);
    relay.start().await.context("Failed to start relay listeners")?;

    let listener = bind_control(&args.control, DEFAULT_PORT).await?;
    let service = Arc::new(RelayService::new("sync", relay));
    let registry = ServiceRegistry::new().with("sync", service as Arc<dyn ControlledService>);

    serve(listener, &registry, shutdown_signal())
        .await
        .context("Control endpoint failed")
}
