// ABOUTME: Relay route table: which local port forwards to which remote peer

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Errors in the relay route table
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RelayTableError {
    /// A clause is not `LPORT=RHOST:RPORT`
    #[error("Invalid relay clause '{0}'; format: LPORT=RHOST:RPORT[,LPORT=RHOST:RPORT]*")]
    InvalidClause(String),

    /// Local port is not in 1..=65535
    #[error("Invalid local port in config: {0}")]
    InvalidLocalPort(String),

    /// Remote host is blank
    #[error("Empty remote host in config: {0}")]
    EmptyRemoteHost(String),

    /// Remote port is not in 1..=65535
    #[error("Invalid remote port in config: {0}")]
    InvalidRemotePort(String),

    /// Two routes share a local port
    #[error("Duplicate local port in config: {0}")]
    DuplicateLocalPort(u16),

    /// No routes at all
    #[error("Relay config has no routes")]
    Empty,
}

/// One local port forwarded to one remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRoute {
    /// Port listened on locally
    pub local_port: u16,
    /// Peer host name or address
    pub remote_host: String,
    /// Peer port
    pub remote_port: u16,
}

impl RelayRoute {
    /// Route from `local_port` to `remote_host:remote_port`
    pub fn new(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_host: remote_host.into(),
            remote_port,
        }
    }

    /// Remote endpoint as `host:port`
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

impl fmt::Display for RelayRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.local_port, self.remote_host, self.remote_port)
    }
}

/// Validated set of routes with unique local ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTable(Vec<RelayRoute>);

impl RelayTable {
    /// Build a table, rejecting duplicate local ports and an empty route list
    pub fn new(routes: Vec<RelayRoute>) -> Result<Self, RelayTableError> {
        if routes.is_empty() {
            return Err(RelayTableError::Empty);
        }

        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.local_port) {
                return Err(RelayTableError::DuplicateLocalPort(route.local_port));
            }
        }

        Ok(Self(routes))
    }

    /// Parse `LPORT=RHOST:RPORT[,LPORT=RHOST:RPORT]*`; blank clauses are ignored
    pub fn parse(input: &str) -> Result<Self, RelayTableError> {
        input
            .split(',')
            .map(str::trim)
            .filter(|clause| !clause.is_empty())
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()
            .and_then(Self::new)
    }

    /// Routes in configuration order
    pub fn routes(&self) -> &[RelayRoute] {
        &self.0
    }
}

impl FromStr for RelayTable {
    type Err = RelayTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_clause(clause: &str) -> Result<RelayRoute, RelayTableError> {
    let (local, remote) = clause
        .split_once('=')
        .filter(|(_, remote)| !remote.contains('='))
        .ok_or_else(|| RelayTableError::InvalidClause(clause.to_string()))?;

    let local_port = parse_port(local)
        .ok_or_else(|| RelayTableError::InvalidLocalPort(local.trim().to_string()))?;

    let (host, port) = remote
        .rsplit_once(':')
        .ok_or_else(|| RelayTableError::InvalidClause(clause.to_string()))?;

    let host = host.trim();
    if host.is_empty() {
        return Err(RelayTableError::EmptyRemoteHost(remote.trim().to_string()));
    }

    let remote_port = parse_port(port)
        .ok_or_else(|| RelayTableError::InvalidRemotePort(port.trim().to_string()))?;

    Ok(RelayRoute::new(local_port, host, remote_port))
}

fn parse_port(text: &str) -> Option<u16> {
    text.trim().parse::<u16>().ok().filter(|port| *port > 0)
}
