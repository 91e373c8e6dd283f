// ABOUTME: Registry of open relay connection pairs that a pause can drain
//
// Each entry holds the sending half of a one-shot close signal; the connection
// task holds the receiver and tears down both sockets when it fires. A send that
// fails means the task already finished, which is counted as already closed.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use super::table::RelayRoute;

/// Unique identifier for a relayed connection pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Endpoints of one relayed pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Route the pair was accepted on
    pub route: RelayRoute,
    /// Inbound client address
    pub client: SocketAddr,
    /// Outbound peer address
    pub upstream: SocketAddr,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.client, self.upstream)
    }
}

struct Entry {
    info: ConnectionInfo,
    close: oneshot::Sender<()>,
}

/// Outcome of draining the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Pairs that were open and have been told to close
    pub just_closed: usize,
    /// Pairs whose connection task had already ended
    pub already_closed: usize,
}

/// Open connection pairs, keyed by id
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an established pair; the receiver fires when it must close
    pub fn insert(&mut self, info: ConnectionInfo) -> (ConnectionId, oneshot::Receiver<()>) {
        let id = ConnectionId::new();
        let (close, closed) = oneshot::channel();
        debug!(id = %id, connection = %info, "Registered connection");
        self.entries.insert(id, Entry { info, close });
        (id, closed)
    }

    /// Forget a pair that ended on its own; returns its info if it was still registered
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.entries.remove(&id).map(|entry| entry.info)
    }

    /// Number of registered pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pairs are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Info for every registered pair
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.entries.values().map(|entry| entry.info.clone()).collect()
    }

    /// Signal every pair to close and empty the registry
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();

        for (id, entry) in self.entries.drain() {
            if entry.close.send(()).is_ok() {
                info!(id = %id, connection = %entry.info, "Closed");
                report.just_closed += 1;
            } else {
                info!(id = %id, connection = %entry.info, "Cleaned up");
                report.already_closed += 1;
            }
        }

        report
    }
}
