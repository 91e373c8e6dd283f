// ABOUTME: Extraction of block height and epoch from node output lines
//
// The extractor is a pure per-line function. SyncEventSink wraps it as the
// supervisor's LineSink and fans each event out to the flow controller and to
// push channel subscribers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::supervisor::{LineSink, OutputStream};

/// Pattern matching the node's periodic sync log line
pub const DEFAULT_SYNC_PATTERN: &str = r"Block height: (\d+).*epoch: (\d+)";

/// Errors building an extractor
#[derive(Error, Debug)]
pub enum ExtractorError {
    /// The pattern is not a valid regular expression
    #[error("Invalid sync pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The pattern does not capture both block and epoch
    #[error("Sync pattern must have two capture groups (block, epoch), found {0}")]
    MissingCaptures(usize),
}

/// A block height and epoch reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Block height
    pub block: u64,
    /// Epoch number
    pub epoch: u64,
}

/// Matches output lines against a two-capture block/epoch pattern
#[derive(Debug, Clone)]
pub struct LineStateExtractor {
    pattern: Regex,
    ansi: Regex,
}

impl LineStateExtractor {
    /// Build an extractor; the first capture group is the block, the second the epoch
    pub fn new(pattern: &str) -> Result<Self, ExtractorError> {
        let pattern = Regex::new(pattern)?;
        let groups = pattern.captures_len() - 1;
        if groups < 2 {
            return Err(ExtractorError::MissingCaptures(groups));
        }

        Ok(Self {
            pattern,
            ansi: Regex::new(r"\x1b\[[0-9;]*m")?,
        })
    }

    /// Extract a sync event from one line, if it carries one.
    ///
    /// Numbers that do not fit a `u64` are logged and treated as a non-match.
    pub fn extract(&self, line: &str) -> Option<SyncEvent> {
        let line = self.ansi.replace_all(line, "");
        let captures = self.pattern.captures(&line)?;

        let block = captures.get(1)?.as_str();
        let epoch = captures.get(2)?.as_str();

        match (block.parse::<u64>(), epoch.parse::<u64>()) {
            (Ok(block), Ok(epoch)) => Some(SyncEvent { block, epoch }),
            _ => {
                warn!(block = block, epoch = epoch, "Unparseable block/epoch in sync line");
                None
            }
        }
    }
}

/// Line sink that turns node output into sync events.
///
/// The controller channel is unbounded so no event is ever dropped on the way
/// to the flow controller; subscribers that fall behind may lag.
pub struct SyncEventSink {
    extractor: LineStateExtractor,
    controller: mpsc::UnboundedSender<SyncEvent>,
    subscribers: broadcast::Sender<SyncEvent>,
}

impl SyncEventSink {
    /// Create a sink feeding the flow controller and push subscribers
    pub const fn new(
        extractor: LineStateExtractor,
        controller: mpsc::UnboundedSender<SyncEvent>,
        subscribers: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            extractor,
            controller,
            subscribers,
        }
    }
}

impl LineSink for SyncEventSink {
    fn on_line(&self, _stream: OutputStream, line: &str) {
        let Some(event) = self.extractor.extract(line) else {
            return;
        };

        if self.controller.send(event).is_err() {
            warn!(block = event.block, epoch = event.epoch, "Flow controller gone, sync event dropped");
        }
        // No subscribers is the normal idle case
        let _ = self.subscribers.send(event);
    }
}
