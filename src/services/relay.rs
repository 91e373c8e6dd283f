// ABOUTME: The TCP relay as a controlled service: start resumes, pause drains

use std::sync::Arc;

use async_trait::async_trait;

use crate::control::{ControlledService, ServiceError, ServiceStatus};
use crate::relay::TcpRelay;

/// Control endpoint view of a [`TcpRelay`]
pub struct RelayService {
    name: String,
    relay: Arc<TcpRelay>,
}

impl RelayService {
    /// Wrap a relay shared with its listeners and, in combined mode, the flow runner
    pub fn new(name: impl Into<String>, relay: Arc<TcpRelay>) -> Self {
        Self {
            name: name.into(),
            relay,
        }
    }

    /// The wrapped relay
    pub fn relay(&self) -> &Arc<TcpRelay> {
        &self.relay
    }
}

#[async_trait]
impl ControlledService for RelayService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> ServiceStatus {
        ServiceStatus::Relay(self.relay.status().await)
    }

    async fn start(&self) -> Result<ServiceStatus, ServiceError> {
        Ok(ServiceStatus::Relay(self.relay.resume().await))
    }

    async fn pause(&self) -> Result<ServiceStatus, ServiceError> {
        Ok(ServiceStatus::Drained(self.relay.pause().await))
    }
}
