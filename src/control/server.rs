// ABOUTME: HTTP control endpoint built from a service registry
//
// Every service gets `/`, `/start`, `/pause` (alias `/stop`), `/restart`, `/mute`
// and `/unmute` under `/<id>`. With a single registered service the same routes
// are also served at the root. Trailing slashes are trimmed before routing and
// a plain GET on a service root can be upgraded to the push channel.

use std::any::Any;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router, ServiceExt};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::normalize_path::NormalizePath;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::messages::ErrorBody;
use super::push;
use super::service::{ControlledService, ServiceError, ServiceRegistry, ServiceStatus};

type SharedService = Arc<dyn ControlledService>;

/// Errors rendered as `{ "error": "<message>" }`
#[derive(Error, Debug)]
pub enum ApiError {
    /// A service operation failed
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No route matched
    #[error("not found")]
    NotFound,

    /// A handler panicked
    #[error("internal error")]
    Internal,
}

impl ApiError {
    const fn status_code(&self) -> StatusCode {
        match self {
            Self::Service(ServiceError::Unsupported { .. }) => StatusCode::NOT_IMPLEMENTED,
            Self::Service(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, error = %self, "Control request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Control endpoint application, ready to serve or to drive with `oneshot`
pub fn app(registry: &ServiceRegistry) -> NormalizePath<Router> {
    let mut router = Router::new();

    for (id, service) in registry.iter() {
        router = router.nest(&format!("/{id}"), service_routes(Arc::clone(service)));
    }

    router = match registry.single() {
        Some(service) => router.merge(service_routes(Arc::clone(service))),
        None => router.merge(
            Router::new()
                .route("/", get(overview))
                .with_state(registry.clone()),
        ),
    };

    let router = router
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http());

    NormalizePath::trim_trailing_slash(router)
}

/// Serve the control endpoint until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, registry: &ServiceRegistry, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let services: Vec<&str> = registry.iter().map(|(id, _)| id).collect();
    info!(addr = %listener.local_addr()?, services = ?services, "Control endpoint listening");

    let app = app(registry);
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown)
        .await
}

fn service_routes(service: SharedService) -> Router {
    Router::new()
        .route("/", any(status_or_push))
        .route("/start", any(start))
        .route("/pause", any(pause))
        .route("/stop", any(pause))
        .route("/restart", any(restart))
        .route("/mute", any(mute))
        .route("/unmute", any(unmute))
        .with_state(service)
}

async fn overview(State(registry): State<ServiceRegistry>) -> impl IntoResponse {
    Json(registry.statuses().await)
}

async fn status_or_push(
    State(service): State<SharedService>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    match upgrade {
        Some(upgrade) => upgrade.on_upgrade(move |socket| push::serve_socket(socket, service)),
        None => Json(service.status().await).into_response(),
    }
}

async fn start(State(service): State<SharedService>) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(service.start().await?))
}

async fn pause(State(service): State<SharedService>) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(service.pause().await?))
}

async fn restart(State(service): State<SharedService>) -> Result<impl IntoResponse, ApiError> {
    if !service.supports_restart() {
        return Err(ServiceError::Unsupported {
            service: service.name().to_string(),
            operation: "restart",
        }
        .into());
    }

    push::spawn_restart(service);
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "restarting": true }))))
}

async fn mute(State(service): State<SharedService>) -> Json<ServiceStatus> {
    service.mute();
    Json(service.status().await)
}

async fn unmute(State(service): State<SharedService>) -> Json<ServiceStatus> {
    service.unmute();
    Json(service.status().await)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(ToString::to_string))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(panic = %detail, "Control handler panicked");
    ApiError::Internal.into_response()
}
