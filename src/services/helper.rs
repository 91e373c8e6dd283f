// ABOUTME: An external helper executable (e.g. simpleproxy) as a controlled service
//
// Output is only logged. Stopping uses SIGKILL since such helpers do not exit
// cleanly on SIGTERM, and status comes from the process table.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::control::{ControlledService, ProcessStatus, ServiceError, ServiceStatus};
use crate::supervisor::{
    LivenessProbe, LogOnly, MuteHandle, ProcessSpec, ProcessSupervisor, StopStrategy,
};

/// Supervised helper process without flow control
pub struct HelperService {
    name: String,
    supervisor: Mutex<ProcessSupervisor>,
    liveness: LivenessProbe,
    mute: MuteHandle,
}

impl HelperService {
    /// Supervise `spec` with the force-kill stop strategy
    pub fn new(spec: ProcessSpec) -> Self {
        let name = spec.name.clone();
        let supervisor = ProcessSupervisor::new(spec, StopStrategy::ForceKill, Arc::new(LogOnly));
        let mute = supervisor.mute_handle();
        let liveness = supervisor.liveness_probe();
        Self {
            name,
            supervisor: Mutex::new(supervisor),
            liveness,
            mute,
        }
    }

    /// Stop the helper if it is running
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.supervisor.lock().await.stop().await?;
        Ok(())
    }
}

#[async_trait]
impl ControlledService for HelperService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> ServiceStatus {
        let running = self.liveness.is_alive().await;
        ServiceStatus::Process(ProcessStatus {
            running,
            flow: None,
        })
    }

    async fn start(&self) -> Result<ServiceStatus, ServiceError> {
        self.supervisor.lock().await.start().await?;
        Ok(self.status().await)
    }

    async fn pause(&self) -> Result<ServiceStatus, ServiceError> {
        self.supervisor.lock().await.stop().await?;
        Ok(self.status().await)
    }

    fn mute(&self) {
        self.mute.mute();
    }

    fn unmute(&self) {
        self.mute.unmute();
    }
}
