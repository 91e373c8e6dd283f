// ABOUTME: `helper` command: run an external relay executable (PROXY -v -L LOCAL -R REMOTE)

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::error;

use super::util::{bind_control, shutdown_signal};
use super::HelperArgs;
use syncgate::control::{serve, ControlledService, ServiceRegistry};
use syncgate::services::HelperService;
use syncgate::supervisor::ProcessSpec;

const DEFAULT_PORT: u16 = 25550;

/// Execute the helper command
pub async fn execute(args: HelperArgs) -> Result<()> {
    let name = format!("index proxy ({} -> {})", args.local, args.remote);
    let spec = ProcessSpec::new(
        name,
        args.proxy.clone(),
        ["-v", "-L", args.local.as_str(), "-R", args.remote.as_str()],
    );
    let helper = Arc::new(HelperService::new(spec));
    let listener = bind_control(&args.control, DEFAULT_PORT).await?;

    if let Err(e) = helper.start().await {
        error!(error = %e, proxy = %args.proxy, "Failed to start helper");
    }

    let registry = ServiceRegistry::new().with("index", Arc::clone(&helper) as Arc<dyn ControlledService>);
    serve(listener, &registry, shutdown_signal())
        .await
        .context("Control endpoint failed")?;

    helper.shutdown().await.context("Failed to stop helper")?;
    Ok(())
}
