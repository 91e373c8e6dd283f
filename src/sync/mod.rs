// ABOUTME: Sync tracking for the supervised node: event extraction and flow control
//
// Key components:
// - extractor: block/epoch pattern matching on node output lines
// - versions: hard-fork version table keyed by activation height
// - flow: FlowController state machine and the FlowRunner that applies its decisions
// - pause: downstream relay pause targets and the confirm-until-paused loop
// - checkpoint: optional on-disk record of the flow state
// - resync: removal of the node's state directories for a forced resync

pub mod checkpoint;
pub mod extractor;
pub mod flow;
pub mod pause;
pub mod resync;
pub mod versions;

pub use checkpoint::{CheckpointError, CheckpointStore, FlowCheckpoint};
pub use extractor::{ExtractorError, LineStateExtractor, SyncEvent, SyncEventSink, DEFAULT_SYNC_PATTERN};
pub use flow::{FlowController, FlowDecision, FlowError, FlowRunner, FlowState};
pub use pause::{pause_until_confirmed, PauseError, PauseTarget, RemoteRelay};
pub use resync::{StateDirs, STATE_SUBDIRS};
pub use versions::{VersionTable, VersionTableError};
