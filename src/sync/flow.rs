// ABOUTME: Flow control for the node: hard-fork binary switching and epoch pauses
//
// FlowController is the pure state machine; FlowRunner feeds it sync events in
// arrival order and carries out its decisions against the supervisor and the
// downstream relay. The version is evaluated before the epoch on every event.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::checkpoint::{CheckpointError, CheckpointStore, FlowCheckpoint};
use super::extractor::SyncEvent;
use super::pause::{pause_until_confirmed, PauseTarget};
use super::versions::VersionTable;
use crate::supervisor::{ProcessSupervisor, SupervisorError};

/// Errors applying a flow decision
#[derive(Error, Debug)]
pub enum FlowError {
    /// Switching binaries failed; the previous version stays current
    #[error("Failed to switch node from {from} to {to}: {source}")]
    Switch {
        /// Binary that was running
        from: String,
        /// Binary that should run
        to: String,
        /// Supervisor failure
        #[source]
        source: SupervisorError,
    },

    /// The checkpoint could not be written
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Externally visible flow state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    /// Highest epoch observed
    pub current_epoch: u64,
    /// Binary currently selected
    pub current_version: String,
}

/// What to do in response to one sync event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowDecision {
    /// Restart the node on this binary
    pub switch_to: Option<String>,
    /// Ask the downstream relay to pause
    pub pause: bool,
}

/// Epoch and version tracking state machine
#[derive(Debug, Clone)]
pub struct FlowController {
    versions: VersionTable,
    state: FlowState,
}

impl FlowController {
    /// Start at epoch 0 on the table's base binary
    pub fn new(versions: VersionTable) -> Self {
        let current_version = versions.base().to_string();
        Self {
            versions,
            state: FlowState {
                current_epoch: 0,
                current_version,
            },
        }
    }

    /// Resume from a checkpoint.
    ///
    /// A checkpointed binary that is no longer in the table is replaced by the base binary.
    pub fn from_checkpoint(versions: VersionTable, checkpoint: &FlowCheckpoint) -> Self {
        let mut controller = Self::new(versions);
        controller.state.current_epoch = checkpoint.epoch;

        if controller.versions.contains_binary(&checkpoint.version) {
            controller.state.current_version.clone_from(&checkpoint.version);
        } else {
            warn!(
                version = %checkpoint.version,
                base = %controller.state.current_version,
                "Checkpointed version not in version table, using base"
            );
        }
        controller
    }

    /// Current state
    pub const fn state(&self) -> &FlowState {
        &self.state
    }

    /// Version table
    pub const fn versions(&self) -> &VersionTable {
        &self.versions
    }

    /// Evaluate one event.
    ///
    /// The epoch advances immediately. A version change is only reported here;
    /// it becomes current once [`switched`](Self::switched) confirms it, so a
    /// failed switch is attempted again on the next event.
    pub fn observe(&mut self, event: SyncEvent) -> FlowDecision {
        let selected = self.versions.select(event.block);
        let switch_to = (selected != self.state.current_version).then(|| selected.to_string());

        let pause = event.epoch > self.state.current_epoch;
        if pause {
            self.state.current_epoch = event.epoch;
        }

        FlowDecision { switch_to, pause }
    }

    /// Record that the node now runs `version`
    pub fn switched(&mut self, version: impl Into<String>) {
        self.state.current_version = version.into();
    }
}

/// Applies flow decisions to the node supervisor and the downstream relay
pub struct FlowRunner {
    controller: FlowController,
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    pause_target: Option<Arc<dyn PauseTarget>>,
    retry_delay: Duration,
    checkpoint: Option<CheckpointStore>,
    state_tx: watch::Sender<FlowState>,
    pause_task: Option<JoinHandle<u32>>,
}

impl FlowRunner {
    /// Create a runner; without a pause target epoch pauses are only logged
    pub fn new(
        controller: FlowController,
        supervisor: Arc<Mutex<ProcessSupervisor>>,
        pause_target: Option<Arc<dyn PauseTarget>>,
        retry_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(controller.state().clone());
        Self {
            controller,
            supervisor,
            pause_target,
            retry_delay,
            checkpoint: None,
            state_tx,
            pause_task: None,
        }
    }

    /// Persist the flow state to `store` after every transition
    #[must_use]
    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Receiver that always holds the latest flow state
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state_tx.subscribe()
    }

    /// Current state
    pub const fn state(&self) -> &FlowState {
        self.controller.state()
    }

    /// Process events until the extractor side of the channel closes
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SyncEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                error!(block = event.block, epoch = event.epoch, error = %e, "Flow decision failed");
            }
        }
        info!("Sync event stream closed, flow controller stopping");
    }

    /// Evaluate one event and carry out the resulting decision
    pub async fn handle(&mut self, event: SyncEvent) -> Result<FlowDecision, FlowError> {
        let decision = self.controller.observe(event);

        let switch_result = match &decision.switch_to {
            Some(version) => self.switch_version(event, version).await,
            None => Ok(()),
        };

        if decision.pause {
            info!(
                block = event.block,
                epoch = event.epoch,
                "Epoch increased, pausing sync"
            );
            self.request_pause();
        }

        let publish_result = if decision.switch_to.is_some() || decision.pause {
            self.publish()
        } else {
            Ok(())
        };

        match (switch_result, publish_result) {
            (Ok(()), Ok(())) => Ok(decision),
            (Err(switch), Err(checkpoint)) => {
                error!(error = %checkpoint, "Checkpoint write failed");
                Err(switch)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        }
    }

    /// Wait for the running pause loop, if any, and return its attempt count
    pub async fn wait_for_pause(&mut self) -> Option<u32> {
        let task = self.pause_task.take()?;
        task.await.ok()
    }

    async fn switch_version(&mut self, event: SyncEvent, version: &str) -> Result<(), FlowError> {
        let from = self.controller.state().current_version.clone();
        info!(
            block = event.block,
            from = %from,
            to = %version,
            "Hard fork height reached, switching node binary"
        );

        let switch_error = |source| FlowError::Switch {
            from: from.clone(),
            to: version.to_string(),
            source,
        };

        let mut supervisor = self.supervisor.lock().await;
        supervisor.stop().await.map_err(switch_error)?;
        supervisor.set_program(version);
        supervisor.start().await.map_err(switch_error)?;
        drop(supervisor);

        self.controller.switched(version);
        Ok(())
    }

    fn request_pause(&mut self) {
        let Some(target) = self.pause_target.clone() else {
            warn!("No relay configured, epoch pause not forwarded");
            return;
        };

        if self.pause_task.as_ref().is_some_and(|task| !task.is_finished()) {
            info!(target = %target.describe(), "Pause already in progress");
            return;
        }

        let delay = self.retry_delay;
        self.pause_task = Some(tokio::spawn(async move {
            pause_until_confirmed(target.as_ref(), delay).await
        }));
    }

    fn publish(&self) -> Result<(), FlowError> {
        let state = self.controller.state().clone();
        self.state_tx.send_replace(state.clone());

        if let Some(store) = &self.checkpoint {
            store.save(&FlowCheckpoint::now(state.current_epoch, state.current_version))?;
        }
        Ok(())
    }
}
