// ABOUTME: Downstream relay pause targets and the retry loop that waits for confirmation
//
// A pause target is either the in-process TcpRelay or a relay reached through its
// control endpoint. The loop keeps asking until the relay reports that new
// connections are disabled, sleeping a fixed delay between attempts. Resume is a
// single request made on behalf of the indexer.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::relay::{RelayStatus, TcpRelay};

/// Errors asking a relay to pause
#[derive(Error, Debug)]
pub enum PauseError {
    /// The control URL cannot be used
    #[error("Invalid relay control URL {url}: {source}")]
    InvalidUrl {
        /// Configured URL
        url: String,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },

    /// The request failed or returned an unexpected body
    #[error("Relay control request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Something that can be asked to stop accepting new connections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PauseTarget: Send + Sync {
    /// Request a pause; `Ok(true)` once the target confirms new connections are disabled
    async fn pause(&self) -> Result<bool, PauseError>;

    /// Allow new connections again; `Ok(true)` once the target confirms
    async fn resume(&self) -> Result<bool, PauseError>;

    /// Human readable name for logs
    fn describe(&self) -> String;
}

/// A relay reached through its control endpoint
#[derive(Debug, Clone)]
pub struct RemoteRelay {
    client: reqwest::Client,
    pause_url: Url,
    start_url: Url,
}

impl RemoteRelay {
    /// Target the control endpoint at `base`, e.g. `http://relay:8080/sync`
    pub fn new(base: &str, request_timeout: Duration) -> Result<Self, PauseError> {
        let invalid = |source| PauseError::InvalidUrl {
            url: base.to_string(),
            source,
        };

        let mut base_url = Url::parse(base).map_err(invalid)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let pause_url = base_url.join("pause").map_err(invalid)?;
        let start_url = base_url.join("start").map_err(invalid)?;

        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            pause_url,
            start_url,
        })
    }

    /// URL the pause request is sent to
    pub const fn pause_url(&self) -> &Url {
        &self.pause_url
    }

    /// URL the resume request is sent to
    pub const fn start_url(&self) -> &Url {
        &self.start_url
    }

    async fn request(&self, url: &Url) -> Result<RelayStatus, PauseError> {
        let status = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }
}

#[async_trait]
impl PauseTarget for RemoteRelay {
    async fn pause(&self) -> Result<bool, PauseError> {
        let status = self.request(&self.pause_url).await?;
        Ok(!status.can_connect)
    }

    async fn resume(&self) -> Result<bool, PauseError> {
        let status = self.request(&self.start_url).await?;
        Ok(status.can_connect)
    }

    fn describe(&self) -> String {
        self.pause_url.to_string()
    }
}

#[async_trait]
impl PauseTarget for TcpRelay {
    async fn pause(&self) -> Result<bool, PauseError> {
        let report = Self::pause(self).await;
        Ok(!report.can_connect)
    }

    async fn resume(&self) -> Result<bool, PauseError> {
        let status = Self::resume(self).await;
        Ok(status.can_connect)
    }

    fn describe(&self) -> String {
        "local relay".to_string()
    }
}

/// Ask `target` to pause until it confirms; returns the number of attempts made.
///
/// Failures and unconfirmed replies are retried after `retry_delay`; this only
/// ends once the relay reports new connections as disabled.
pub async fn pause_until_confirmed(target: &dyn PauseTarget, retry_delay: Duration) -> u32 {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match target.pause().await {
            Ok(true) => {
                info!(target = %target.describe(), attempts = attempts, "Relay paused");
                return attempts;
            }
            Ok(false) => {
                debug!(target = %target.describe(), attempts = attempts, "Relay still accepting connections");
            }
            Err(e) => {
                warn!(target = %target.describe(), attempts = attempts, error = %e, "Pause request failed");
            }
        }
        tokio::time::sleep(retry_delay).await;
    }
}
