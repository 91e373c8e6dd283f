// ABOUTME: Shared CLI utilities: control endpoint binding and shutdown signals

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use super::ControlArgs;

/// Bind the control endpoint, using `default_port` when none was configured
pub async fn bind_control(args: &ControlArgs, default_port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", args.host, args.port.unwrap_or(default_port));
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control endpoint on {addr}"))
}

/// Resolve on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to create SIGTERM handler: {}", e);
            None
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
        _ = async {
            if let Some(ref mut s) = sigterm {
                s.recv().await
            } else {
                std::future::pending::<Option<()>>().await
            }
        } => {}
    }

    info!("Shutdown signal received");
}
