// ABOUTME: Capability interface for services exposed on the control endpoint
// ABOUTME: and the registry mapping service ids to them

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::relay::{PauseReport, RelayStatus};
use crate::supervisor::SupervisorError;
use crate::sync::{FlowState, PauseError, SyncEvent};

/// Errors from service operations
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Supervisor failure
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The downstream relay could not be driven
    #[error(transparent)]
    Relay(#[from] PauseError),

    /// The downstream relay answered but did not reopen
    #[error("Relay {0} did not confirm resume")]
    ResumeUnconfirmed(String),

    /// The service has no such operation
    #[error("Service {service} does not support {operation}")]
    Unsupported {
        /// Service name
        service: String,
        /// Operation requested
        operation: &'static str,
    },
}

/// Status of a supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    /// Whether the process is alive
    pub running: bool,
    /// Flow state, for the node
    #[serde(flatten)]
    pub flow: Option<FlowState>,
}

/// Status reported by any service; serialized without a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServiceStatus {
    /// Relay status after a pause, with drain counters
    Drained(PauseReport),
    /// Relay gate and connection count
    Relay(RelayStatus),
    /// Supervised process liveness
    Process(ProcessStatus),
}

/// A service the control endpoint can drive
#[async_trait]
pub trait ControlledService: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Current status
    async fn status(&self) -> ServiceStatus;

    /// Start the process, or open the relay gate
    async fn start(&self) -> Result<ServiceStatus, ServiceError>;

    /// Stop the process, or close the relay gate and drain
    async fn pause(&self) -> Result<ServiceStatus, ServiceError>;

    /// Indexer caught up: let sync traffic flow again
    async fn resume(&self) -> Result<ServiceStatus, ServiceError> {
        self.start().await
    }

    /// Whether [`restart`](Self::restart) does anything
    fn supports_restart(&self) -> bool {
        false
    }

    /// Stop, wipe state and start fresh
    async fn restart(&self) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported {
            service: self.name().to_string(),
            operation: "restart",
        })
    }

    /// Stop logging process output
    fn mute(&self) {}

    /// Resume logging process output
    fn unmute(&self) {}

    /// Sync events to push to connected clients, if the service produces any
    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEvent>> {
        None
    }
}

/// Services by id, built once at startup
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn ControlledService>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service under `id`, replacing any previous one
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, service: Arc<dyn ControlledService>) -> Self {
        self.services.insert(id.into(), service);
        self
    }

    /// Service registered under `id`
    pub fn get(&self, id: &str) -> Option<&Arc<dyn ControlledService>> {
        self.services.get(id)
    }

    /// The service, when exactly one is registered
    pub fn single(&self) -> Option<&Arc<dyn ControlledService>> {
        if self.services.len() == 1 {
            self.services.values().next()
        } else {
            None
        }
    }

    /// Services in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn ControlledService>)> {
        self.services.iter().map(|(id, svc)| (id.as_str(), svc))
    }

    /// Number of services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Status of every service, keyed by id
    pub async fn statuses(&self) -> BTreeMap<String, ServiceStatus> {
        let mut statuses = BTreeMap::new();
        for (id, service) in &self.services {
            statuses.insert(id.clone(), service.status().await);
        }
        statuses
    }
}
