// ABOUTME: Optional on-disk checkpoint of the flow controller's epoch and version
//
// Written through a temp file in the same directory and renamed into place, so
// a crash mid-write leaves either the old or the new checkpoint.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors reading or writing a checkpoint
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Filesystem failure
    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        /// Checkpoint path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a checkpoint
    #[error("Corrupt checkpoint at {path}: {source}")]
    Corrupt {
        /// Checkpoint path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted flow state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCheckpoint {
    /// Last epoch seen
    pub epoch: u64,
    /// Binary selected at that point
    pub version: String,
    /// When the checkpoint was written
    pub updated_at: DateTime<Utc>,
}

impl FlowCheckpoint {
    /// Checkpoint stamped with the current time
    pub fn now(epoch: u64, version: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            updated_at: Utc::now(),
        }
    }
}

/// JSON checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by `path`; nothing is touched until load or save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint; a missing file is `Ok(None)`
    pub fn load(&self) -> Result<Option<FlowCheckpoint>, CheckpointError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Atomically replace the checkpoint
    pub fn save(&self, checkpoint: &FlowCheckpoint) -> Result<(), CheckpointError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
