// ABOUTME: `status` command: serve the aggregated status of other control endpoints

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use super::util::{bind_control, shutdown_signal};
use super::StatusArgs;
use syncgate::control::StatusHub;

const DEFAULT_PORT: u16 = 25555;

/// Execute the status command
pub async fn execute(args: StatusArgs) -> Result<()> {
    let hub = StatusHub::parse(&args.targets, Duration::from_secs(args.timeout_secs))
        .context("Invalid TARGETS")?;
    let listener = bind_control(&args.control, DEFAULT_PORT).await?;

    let targets: Vec<&str> = hub.names().collect();
    info!(addr = %listener.local_addr()?, targets = ?targets, "Status hub listening");

    let app = hub.app();
    axum::serve(
        listener,
        axum::ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Status hub failed")
}
