// ABOUTME: Push channel: streams sync events to a WebSocket client and runs its commands
//
// Each client holds its own broadcast receiver, dropped when the socket closes.
// Malformed commands are logged and ignored without closing the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use super::messages::{ClientCommand, PushMessage};
use super::service::ControlledService;
use crate::sync::SyncEvent;

/// Serve one push channel client until it disconnects
pub async fn serve_socket(socket: WebSocket, service: Arc<dyn ControlledService>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = service.subscribe();
    let mut pushing = events.is_some();

    info!(service = %service.name(), "Push client connected");

    loop {
        tokio::select! {
            event = next_event(&mut events), if pushing => {
                let Some(event) = event else {
                    debug!(service = %service.name(), "Sync event source closed");
                    pushing = false;
                    continue;
                };
                let text = match serde_json::to_string(&PushMessage { synced: event }) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "Failed to encode push message");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => handle_command(&service, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(service = %service.name(), error = %e, "Push socket error");
                        break;
                    }
                }
            }
        }
    }

    info!(service = %service.name(), "Push client disconnected");
}

/// Next event for this client, skipping over any it lagged behind on
async fn next_event(events: &mut Option<broadcast::Receiver<SyncEvent>>) -> Option<SyncEvent> {
    let events = events.as_mut()?;
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Push client lagging, events skipped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Apply one client command
pub async fn handle_command(service: &Arc<dyn ControlledService>, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(service = %service.name(), error = %e, message = %text, "Ignoring malformed command");
            return;
        }
    };

    info!(service = %service.name(), command = ?command, "Command received");

    if command.resume {
        info!(service = %service.name(), "Resuming sync");
        if let Err(e) = service.resume().await {
            error!(service = %service.name(), error = %e, "Resume failed");
        }
    }

    if command.restart {
        if service.supports_restart() {
            spawn_restart(Arc::clone(service));
        } else {
            warn!(service = %service.name(), "Restart requested but not supported");
        }
    }
}

/// Run a restart in the background, logging its outcome
pub fn spawn_restart(service: Arc<dyn ControlledService>) {
    tokio::spawn(async move {
        info!(service = %service.name(), "Restarting with fresh state");
        match service.restart().await {
            Ok(()) => info!(service = %service.name(), "Restart complete"),
            Err(e) => error!(service = %service.name(), error = %e, "Restart failed"),
        }
    });
}
