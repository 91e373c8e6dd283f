// ABOUTME: Control channel: HTTP endpoint, push channel and status aggregation
//
// Key components:
// - service: ControlledService capability trait and the ServiceRegistry
// - server: axum router with per-service routes, 404 fallback and panic boundary
// - push: WebSocket push of sync events and client commands
// - messages: JSON bodies shared by server and push channel
// - status_hub: aggregate status of several control endpoints

pub mod messages;
pub mod push;
pub mod server;
pub mod service;
pub mod status_hub;

pub use messages::{ClientCommand, ErrorBody, PushMessage};
pub use server::{app, serve, ApiError};
pub use service::{ControlledService, ProcessStatus, ServiceError, ServiceRegistry, ServiceStatus};
pub use status_hub::{StatusHub, StatusHubError, TargetStatus};
