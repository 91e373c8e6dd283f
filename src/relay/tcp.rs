// ABOUTME: TCP relay forwarding local ports to remote peers behind a shared pause gate
// ABOUTME: Pausing closes the gate and drains every open pair across all routes

//! Multi-target TCP relay.
//!
//! Every route gets its own listener and accept loop; all of them share one
//! `canConnect` gate and one [`ConnectionRegistry`] behind a single mutex, so a
//! pause cannot race an accept: a pair is either registered before the gate
//! closes (and gets drained) or sees the closed gate and is dropped.
//!
//! ```text
//!   client ──▶ :26666 ─┐                       ┌──▶ peer-a:26656
//!   client ──▶ :26667 ─┼─▶ gate ─▶ registry ──┼──▶ peer-b:26656
//!   client ──▶ :26668 ─┘                       └──▶ peer-c:46656
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{ConnectionInfo, ConnectionRegistry};
use super::table::{RelayRoute, RelayTable};

/// Default time allowed for the outbound connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur starting the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind a route's listener
    #[error("Failed to bind TCP listener on {addr}: {source}")]
    BindFailed {
        /// Address that could not be bound
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Gate state and open connection count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    /// Whether new connections are accepted
    pub can_connect: bool,
    /// Number of open pairs
    pub connections: usize,
}

/// Relay status after a pause, with drain counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseReport {
    /// Whether new connections are accepted
    pub can_connect: bool,
    /// Number of open pairs left
    pub connections: usize,
    /// Pairs this pause closed
    pub connections_just_closed: usize,
    /// Pairs that were already torn down when the pause reached them
    pub connections_already_closed: usize,
}

/// State shared by every accept loop and the control side
struct RelayShared {
    can_connect: bool,
    registry: ConnectionRegistry,
}

impl RelayShared {
    fn status(&self) -> RelayStatus {
        RelayStatus {
            can_connect: self.can_connect,
            connections: self.registry.len(),
        }
    }
}

/// TCP relay over a set of routes with one shared pause gate
pub struct TcpRelay {
    table: RelayTable,
    listen_host: String,
    connect_timeout: Duration,
    shared: Arc<Mutex<RelayShared>>,
    listeners: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TcpRelay {
    /// Create a relay; it starts with new connections enabled
    pub fn new(table: RelayTable, listen_host: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            table,
            listen_host: listen_host.into(),
            connect_timeout,
            shared: Arc::new(Mutex::new(RelayShared {
                can_connect: true,
                registry: ConnectionRegistry::new(),
            })),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Configured routes
    pub const fn table(&self) -> &RelayTable {
        &self.table
    }

    /// Bind every route and start accepting.
    ///
    /// All listeners are bound before any accept loop starts, so a bind failure
    /// leaves nothing running. Returns the bound addresses in route order.
    pub async fn start(&self) -> Result<Vec<SocketAddr>, RelayError> {
        info!(routes = ?self.table.routes(), "Relay config");

        let mut bound = Vec::with_capacity(self.table.routes().len());
        for route in self.table.routes() {
            let addr = format!("{}:{}", self.listen_host, route.local_port);
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|source| RelayError::BindFailed { addr, source })?;
            bound.push((listener, route.clone()));
        }

        let mut addrs = Vec::with_capacity(bound.len());
        for (listener, route) in bound {
            if let Ok(addr) = listener.local_addr() {
                addrs.push(addr);
            }
            self.serve(listener, route);
        }

        Ok(addrs)
    }

    /// Run an accept loop for `route` on an already bound listener
    pub fn serve(&self, listener: TcpListener, route: RelayRoute) {
        let shared = Arc::clone(&self.shared);
        let connect_timeout = self.connect_timeout;

        let handle = tokio::spawn(accept_loop(listener, route, shared, connect_timeout));

        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(handle);
        }
    }

    /// Disable new connections and close every open pair.
    ///
    /// Idempotent: pausing a paused relay only reports.
    pub async fn pause(&self) -> PauseReport {
        let mut shared = self.shared.lock().await;

        if shared.can_connect {
            info!("Disabling new connections");
            shared.can_connect = false;
        } else {
            debug!("New connections already disabled");
        }

        if !shared.registry.is_empty() {
            info!(connections = shared.registry.len(), "Closing/cleaning up connections");
        }
        let drained = shared.registry.drain();

        PauseReport {
            can_connect: shared.can_connect,
            connections: shared.registry.len(),
            connections_just_closed: drained.just_closed,
            connections_already_closed: drained.already_closed,
        }
    }

    /// Enable new connections; nothing is reopened
    pub async fn resume(&self) -> RelayStatus {
        let mut shared = self.shared.lock().await;
        if !shared.can_connect {
            info!("Enabling new connections");
            shared.can_connect = true;
        }
        shared.status()
    }

    /// Gate state and open connection count
    pub async fn status(&self) -> RelayStatus {
        self.shared.lock().await.status()
    }

    /// Endpoints of every open pair
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared.lock().await.registry.connections()
    }
}

impl Drop for TcpRelay {
    fn drop(&mut self) {
        if let Ok(listeners) = self.listeners.get_mut() {
            for handle in listeners.drain(..) {
                handle.abort();
            }
        }
    }
}

/// Accept loop for one route, runs until the relay is dropped
async fn accept_loop(
    listener: TcpListener,
    route: RelayRoute,
    shared: Arc<Mutex<RelayShared>>,
    connect_timeout: Duration,
) {
    info!(route = %route, "Relay accept loop started");

    loop {
        match listener.accept().await {
            Ok((inbound, client)) => {
                tokio::spawn(handle_inbound(
                    inbound,
                    client,
                    route.clone(),
                    Arc::clone(&shared),
                    connect_timeout,
                ));
            }
            Err(e) => {
                error!(route = %route, error = %e, "Accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Relay one inbound connection, if the gate allows it
async fn handle_inbound(
    mut inbound: TcpStream,
    client: SocketAddr,
    route: RelayRoute,
    shared: Arc<Mutex<RelayShared>>,
    connect_timeout: Duration,
) {
    if !shared.lock().await.can_connect {
        info!(route = %route, client = %client, "Rejected");
        return;
    }

    debug!(route = %route, client = %client, "Connecting");

    let connect = TcpStream::connect((route.remote_host.as_str(), route.remote_port));
    let mut upstream = match tokio::time::timeout(connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            log_connect_failure(&route, &e);
            return;
        }
        Err(_) => {
            warn!(route = %route, timeout = ?connect_timeout, "Connect timed out");
            return;
        }
    };

    let upstream_addr = match upstream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            log_connect_failure(&route, &e);
            return;
        }
    };

    let info = ConnectionInfo {
        route: route.clone(),
        client,
        upstream: upstream_addr,
    };

    // The gate may have closed while connecting
    let (id, mut closed) = {
        let mut shared = shared.lock().await;
        if !shared.can_connect {
            info!(route = %route, client = %client, "Rejected after connect, relay paused");
            return;
        }
        shared.registry.insert(info)
    };

    info!(route = %route, client = %client, id = %id, "Connected");

    tokio::select! {
        result = copy_bidirectional(&mut inbound, &mut upstream) => {
            match result {
                Ok((to_remote, to_client)) => {
                    debug!(id = %id, to_remote = to_remote, to_client = to_client, "Connection closed");
                }
                Err(e) => {
                    debug!(id = %id, error = %e, "Connection ended with error");
                }
            }
        }
        _ = &mut closed => {
            debug!(id = %id, "Force closing connection");
        }
    }

    // A drain that runs before the removal below must see this pair as already closed
    drop(closed);
    drop(inbound);
    drop(upstream);

    shared.lock().await.registry.remove(id);
}

fn log_connect_failure(route: &RelayRoute, e: &std::io::Error) {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::TimedOut
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted => {
            warn!(route = %route, kind = ?e.kind(), "Connect failed");
        }
        _ => {
            error!(route = %route, error = %e, "Connect failed");
        }
    }
}
