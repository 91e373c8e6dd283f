// ABOUTME: Concrete services registered with the control endpoint
//
// Key components:
// - node: chain node supervisor with sync extraction, flow control and resync
// - relay: multi-target TCP relay (start resumes, pause drains)
// - helper: external helper executable stopped with SIGKILL

pub mod helper;
pub mod node;
pub mod relay;

pub use helper::HelperService;
pub use node::{NodeOptions, NodeService, NodeSetupError};
pub use relay::RelayService;
