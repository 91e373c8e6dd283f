// ABOUTME: Status hub aggregating the status endpoints of several control endpoints

use std::collections::BTreeMap;
use std::time::Duration;

use axum::routing::get;
use axum::{extract::State, Json, Router};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tower_http::normalize_path::NormalizePath;
use tower_http::trace::TraceLayer;
use url::Url;

/// Errors in the hub's target list
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StatusHubError {
    /// A clause is not `name=url`
    #[error("Invalid status target '{0}', expected name=url")]
    InvalidClause(String),

    /// The URL does not parse
    #[error("Invalid URL for status target {name}: {url}")]
    InvalidUrl {
        /// Target name
        name: String,
        /// Configured URL
        url: String,
    },

    /// Two targets share a name
    #[error("Duplicate status target {0}")]
    Duplicate(String),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Outcome of querying one target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetStatus {
    /// The target answered; its status body is passed through
    Running {
        /// Status body
        running: Value,
    },
    /// The target could not be queried
    Error {
        /// Failure message
        error: String,
    },
}

/// Queries a fixed set of control endpoints
#[derive(Debug, Clone)]
pub struct StatusHub {
    client: reqwest::Client,
    targets: BTreeMap<String, Url>,
}

impl StatusHub {
    /// Hub over `name=url[,name=url...]`
    pub fn parse(targets: &str, request_timeout: Duration) -> Result<Self, StatusHubError> {
        let mut parsed = BTreeMap::new();
        for clause in targets.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (name, url) = clause
                .split_once('=')
                .ok_or_else(|| StatusHubError::InvalidClause(clause.to_string()))?;
            let (name, url) = (name.trim(), url.trim());

            let parsed_url = Url::parse(url).map_err(|_| StatusHubError::InvalidUrl {
                name: name.to_string(),
                url: url.to_string(),
            })?;

            if parsed.insert(name.to_string(), parsed_url).is_some() {
                return Err(StatusHubError::Duplicate(name.to_string()));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StatusHubError::Client(e.to_string()))?;

        Ok(Self {
            client,
            targets: parsed,
        })
    }

    /// Target names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Query every target concurrently
    pub async fn collect(&self) -> BTreeMap<String, TargetStatus> {
        let queries = self.targets.iter().map(|(name, url)| async move {
            let status = match self.fetch(url).await {
                Ok(running) => TargetStatus::Running { running },
                Err(e) => TargetStatus::Error {
                    error: e.to_string(),
                },
            };
            (name.clone(), status)
        });

        join_all(queries).await.into_iter().collect()
    }

    async fn fetch(&self, url: &Url) -> Result<Value, reqwest::Error> {
        self.client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Router serving the aggregate at `/`
    pub fn app(self) -> NormalizePath<Router> {
        let router = Router::new()
            .route("/", get(aggregate))
            .fallback(|| async { super::server::ApiError::NotFound })
            .layer(TraceLayer::new_for_http())
            .with_state(self);
        NormalizePath::trim_trailing_slash(router)
    }
}

async fn aggregate(State(hub): State<StatusHub>) -> Json<BTreeMap<String, TargetStatus>> {
    Json(hub.collect().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_targets() {
        let hub = StatusHub::parse(
            "node=http://node:25551, sync=http://sync-proxy:25552/,index=http://rpc-proxy:25550",
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(hub.names().collect::<Vec<_>>(), vec!["index", "node", "sync"]);
    }

    #[test]
    fn test_parse_rejects_bad_targets() {
        assert_eq!(
            StatusHub::parse("node", Duration::from_secs(1)).unwrap_err(),
            StatusHubError::InvalidClause("node".to_string())
        );
        assert!(matches!(
            StatusHub::parse("node=not a url", Duration::from_secs(1)),
            Err(StatusHubError::InvalidUrl { .. })
        ));
        assert_eq!(
            StatusHub::parse("a=http://x,a=http://y", Duration::from_secs(1)).unwrap_err(),
            StatusHubError::Duplicate("a".to_string())
        );
    }

    #[test]
    fn test_target_status_shape() {
        let running = TargetStatus::Running {
            running: json!({"canConnect": true, "connections": 0}),
        };
        assert_eq!(
            serde_json::to_value(running).unwrap(),
            json!({"running": {"canConnect": true, "connections": 0}})
        );

        let failed = TargetStatus::Error {
            error: "connection refused".to_string(),
        };
        assert_eq!(
            serde_json::to_value(failed).unwrap(),
            json!({"error": "connection refused"})
        );
    }

    #[tokio::test]
    async fn test_unreachable_target_reports_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let hub = StatusHub::parse(&format!("gone=http://127.0.0.1:{port}"), Duration::from_secs(2)).unwrap();
        let statuses = hub.collect().await;

        assert!(matches!(statuses.get("gone"), Some(TargetStatus::Error { .. })));
    }
}
