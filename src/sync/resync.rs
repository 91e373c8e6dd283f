// ABOUTME: Removal of the node's chain state directories before a forced resync

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};

/// Subdirectories of the chain directory that hold synced state
pub const STATE_SUBDIRS: [&str; 4] = ["db", "cometbft", "tx_wasm_cache", "vp_wasm_cache"];

/// The state directories of one chain under a node data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDirs {
    root: PathBuf,
    chain_id: String,
}

impl StateDirs {
    /// State directories for `chain_id` under `root`
    pub fn new(root: impl Into<PathBuf>, chain_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            chain_id: chain_id.into(),
        }
    }

    /// Chain directory the state subdirectories live in
    pub fn chain_dir(&self) -> PathBuf {
        self.root.join(&self.chain_id)
    }

    /// Every directory removed by [`remove_all`](Self::remove_all)
    pub fn paths(&self) -> Vec<PathBuf> {
        let chain_dir = self.chain_dir();
        STATE_SUBDIRS.iter().map(|sub| chain_dir.join(sub)).collect()
    }

    /// Delete every state directory, retrying each one until it is gone.
    ///
    /// A directory that does not exist counts as removed. Never gives up: a
    /// partially deleted state is not something the node can start from.
    pub async fn remove_all(&self, retry_delay: Duration) {
        for path in self.paths() {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match remove_dir(&path).await {
                    Ok(()) => {
                        info!(path = %path.display(), "Removed state directory");
                        break;
                    }
                    Err(e) => {
                        error!(
                            path = %path.display(),
                            attempt = attempt,
                            error = %e,
                            "Failed to remove state directory, retrying"
                        );
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
    }
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
