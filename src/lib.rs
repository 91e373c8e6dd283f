// ABOUTME: Library crate for syncgate exposing the supervisor, flow control, relay and control endpoint

//! Operational sidecar for a chain full node.
//!
//! - [`supervisor`]: owns one external executable and turns its output into lines
//! - [`sync`]: extracts block/epoch events and drives pause and hard-fork decisions
//! - [`relay`]: multi-listener TCP relay with a drainable connection registry
//! - [`control`]: HTTP control endpoint and push channel over a service registry
//! - [`services`]: the node, relay and helper services exposed through [`control`]

pub mod control;
pub mod logging;
pub mod relay;
pub mod services;
pub mod supervisor;
pub mod sync;
