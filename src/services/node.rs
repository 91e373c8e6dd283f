// ABOUTME: The chain node as a controlled service: supervisor, sync extraction and flow control
//
// Wires node output through the sync extractor into a FlowRunner and exposes the
// result on the control endpoint. Restart wipes the chain state directories
// between stop and start to force a full resync. Status is read from published
// state only, so it answers while a restart or binary switch holds the supervisor.
// A resume from the indexer is forwarded to the downstream relay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::control::{ControlledService, ProcessStatus, ServiceError, ServiceStatus};
use crate::supervisor::{LivenessProbe, MuteHandle, ProcessSpec, ProcessSupervisor, StopStrategy};
use crate::sync::{
    CheckpointError, CheckpointStore, ExtractorError, FlowController, FlowRunner, FlowState,
    LineStateExtractor, PauseTarget, StateDirs, SyncEvent, SyncEventSink, VersionTable,
};

/// Sync events buffered per push subscriber before it starts lagging
const EVENT_BUFFER: usize = 64;

/// Errors wiring up the node service
#[derive(Error, Debug)]
pub enum NodeSetupError {
    /// The sync pattern is unusable
    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    /// The checkpoint exists but cannot be read
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Everything needed to run the node service
pub struct NodeOptions {
    /// Service name for logs
    pub name: String,
    /// Arguments passed to every node binary
    pub args: Vec<String>,
    /// Hard-fork binaries by activation height
    pub versions: VersionTable,
    /// Block/epoch pattern for node output
    pub sync_pattern: String,
    /// Directories wiped on restart
    pub state_dirs: StateDirs,
    /// Relay to pause on every new epoch
    pub pause_target: Option<Arc<dyn PauseTarget>>,
    /// Delay between pause attempts, and between state removal attempts
    pub retry_delay: Duration,
    /// Where to persist the flow state, if anywhere
    pub checkpoint: Option<CheckpointStore>,
}

/// Supervised node with flow control
pub struct NodeService {
    name: String,
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    liveness: LivenessProbe,
    mute: MuteHandle,
    pause_target: Option<Arc<dyn PauseTarget>>,
    events: broadcast::Sender<SyncEvent>,
    flow: watch::Receiver<FlowState>,
    state_dirs: StateDirs,
    retry_delay: Duration,
    flow_task: JoinHandle<()>,
}

impl NodeService {
    /// Build the service and start its flow controller; the node itself is not started.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(options: NodeOptions) -> Result<Self, NodeSetupError> {
        let extractor = LineStateExtractor::new(&options.sync_pattern)?;

        let controller = match options.checkpoint.as_ref().map(CheckpointStore::load).transpose()? {
            Some(Some(checkpoint)) => {
                info!(
                    epoch = checkpoint.epoch,
                    version = %checkpoint.version,
                    updated_at = %checkpoint.updated_at,
                    "Resuming flow state from checkpoint"
                );
                FlowController::from_checkpoint(options.versions, &checkpoint)
            }
            _ => FlowController::new(options.versions),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let sink = SyncEventSink::new(extractor, event_tx, events.clone());

        let spec = ProcessSpec::new(
            options.name.clone(),
            controller.state().current_version.clone(),
            options.args,
        );
        let supervisor = ProcessSupervisor::new(spec, StopStrategy::Graceful, Arc::new(sink));
        let mute = supervisor.mute_handle();
        let liveness = supervisor.liveness_probe();
        let supervisor = Arc::new(Mutex::new(supervisor));

        let mut runner = FlowRunner::new(
            controller,
            Arc::clone(&supervisor),
            options.pause_target.clone(),
            options.retry_delay,
        );
        if let Some(store) = options.checkpoint {
            runner = runner.with_checkpoint(store);
        }
        let flow = runner.subscribe();
        let flow_task = tokio::spawn(runner.run(event_rx));

        Ok(Self {
            name: options.name,
            supervisor,
            liveness,
            mute,
            pause_target: options.pause_target,
            events,
            flow,
            state_dirs: options.state_dirs,
            retry_delay: options.retry_delay,
            flow_task,
        })
    }

    /// Latest flow state
    pub fn flow_state(&self) -> FlowState {
        self.flow.borrow().clone()
    }

    /// Shared supervisor, serialized with binary switches
    pub fn supervisor(&self) -> Arc<Mutex<ProcessSupervisor>> {
        Arc::clone(&self.supervisor)
    }

    /// Stop the node if it is running
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.supervisor.lock().await.stop().await?;
        Ok(())
    }
}

impl Drop for NodeService {
    fn drop(&mut self) {
        self.flow_task.abort();
    }
}

#[async_trait]
impl ControlledService for NodeService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> ServiceStatus {
        let running = self.liveness.is_alive().await;
        ServiceStatus::Process(ProcessStatus {
            running,
            flow: Some(self.flow_state()),
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

    async fn resume(&self) -> Result<ServiceStatus, ServiceError> {
        match &self.pause_target {
            Some(target) => {
                info!(service = %self.name, target = %target.describe(), "Resuming relay");
                if !target.resume().await? {
                    return Err(ServiceError::ResumeUnconfirmed(target.describe()));
                }
            }
            None => warn!(service = %self.name, "No relay configured, resume not forwarded"),
        }
        Ok(self.status().await)
    }

    fn supports_restart(&self) -> bool {
        true
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        let mut supervisor = self.supervisor.lock().await;

        supervisor.stop().await?;
        info!(
            service = %self.name,
            chain_dir = %self.state_dirs.chain_dir().display(),
            "Deleting chain state for resync"
        );
        self.state_dirs.remove_all(self.retry_delay).await;
        supervisor.start().await?;

        Ok(())
    }

    fn mute(&self) {
        self.mute.mute();
    }

    fn unmute(&self) {
        self.mute.unmute();
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SyncEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::pause::MockPauseTarget;
    use crate::sync::DEFAULT_SYNC_PATTERN;
    use tempfile::TempDir;

    fn options(program: &str, args: &[&str], data_dir: &TempDir) -> NodeOptions {
        NodeOptions {
            name: "node".to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            versions: VersionTable::single(program).unwrap(),
            sync_pattern: DEFAULT_SYNC_PATTERN.to_string(),
            state_dirs: StateDirs::new(data_dir.path(), "test-chain"),
            pause_target: None,
            retry_delay: Duration::from_millis(10),
            checkpoint: None,
        }
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut opts = options("sleep", &["30"], &dir);
        opts.sync_pattern = "(unclosed".to_string();

        assert!(matches!(
            NodeService::spawn(opts),
            Err(NodeSetupError::Extractor(_))
        ));
    }

    #[tokio::test]
    async fn test_output_events_reach_subscribers_and_flow_state() {
        let dir = TempDir::new().unwrap();
        let node = NodeService::spawn(options(
            "sh",
            &["-c", "echo 'Block height: 120, epoch: 6'; sleep 30"],
            &dir,
        ))
        .unwrap();
        let mut events = node.subscribe().unwrap();

        node.start().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SyncEvent { block: 120, epoch: 6 });

        let mut flow = node.flow.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            flow.wait_for(|state| state.current_epoch == 6),
        )
        .await
        .unwrap()
        .unwrap();

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_wipes_state_and_starts_again() {
        let dir = TempDir::new().unwrap();
        let node = NodeService::spawn(options("sleep", &["30"], &dir)).unwrap();
        for path in node.state_dirs.paths() {
            std::fs::create_dir_all(&path).unwrap();
        }

        node.start().await.unwrap();
        let first_pid = node.supervisor.lock().await.pid();

        node.restart().await.unwrap();

        assert!(node.state_dirs.paths().iter().all(|p| !p.exists()));
        let supervisor = node.supervisor.lock().await;
        assert!(supervisor.is_running());
        assert_ne!(supervisor.pid(), first_pid);
        drop(supervisor);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_answers_while_restart_is_stuck() {
        let dir = TempDir::new().unwrap();
        // State removal under a regular file fails with ENOTDIR and retries forever
        let not_a_dir = dir.path().join("data");
        std::fs::write(&not_a_dir, b"").unwrap();
        let mut opts = options("sleep", &["30"], &dir);
        opts.state_dirs = StateDirs::new(&not_a_dir, "test-chain");
        let node = Arc::new(NodeService::spawn(opts).unwrap());

        node.start().await.unwrap();
        crate::control::push::spawn_restart(Arc::clone(&node) as Arc<dyn ControlledService>);

        for _ in 0..100 {
            if node.supervisor.try_lock().is_err() && node.liveness.pid().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(node.supervisor.try_lock().is_err(), "restart should hold the supervisor");

        let status = tokio::time::timeout(Duration::from_secs(3), node.status())
            .await
            .expect("status must not wait for the restart");
        let ServiceStatus::Process(status) = status else {
            panic!("node status should be a process status");
        };
        assert_eq!(status.flow.map(|flow| flow.current_epoch), Some(0));
    }

    #[tokio::test]
    async fn test_resume_forwards_to_pause_target() {
        let dir = TempDir::new().unwrap();
        let mut target = MockPauseTarget::new();
        target.expect_resume().times(1).returning(|| Ok(true));
        target.expect_describe().returning(|| "mock".to_string());
        let mut opts = options("sleep", &["30"], &dir);
        opts.pause_target = Some(Arc::new(target));
        let node = NodeService::spawn(opts).unwrap();

        assert!(matches!(node.resume().await, Ok(ServiceStatus::Process(_))));
    }

    #[tokio::test]
    async fn test_unconfirmed_resume_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut target = MockPauseTarget::new();
        target.expect_resume().times(1).returning(|| Ok(false));
        target.expect_describe().returning(|| "mock".to_string());
        let mut opts = options("sleep", &["30"], &dir);
        opts.pause_target = Some(Arc::new(target));
        let node = NodeService::spawn(opts).unwrap();

        assert!(matches!(
            node.resume().await,
            Err(ServiceError::ResumeUnconfirmed(target)) if target == "mock"
        ));
    }

    #[tokio::test]
    async fn test_status_includes_flow_state() {
        let dir = TempDir::new().unwrap();
        let node = NodeService::spawn(options("sleep", &["30"], &dir)).unwrap();

        let ServiceStatus::Process(status) = node.status().await else {
            panic!("node status should be a process status");
        };
        assert_eq!(
            status.flow,
            Some(FlowState {
                current_epoch: 0,
                current_version: "sleep".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_mute_is_shared_with_supervisor() {
        let dir = TempDir::new().unwrap();
        let node = NodeService::spawn(options("sleep", &["30"], &dir)).unwrap();

        node.mute();
        assert!(node.supervisor.lock().await.mute_handle().is_muted());
        node.unmute();
        assert!(!node.supervisor.lock().await.mute_handle().is_muted());
    }
}
