// ABOUTME: Multi-target TCP relay with a pause gate and a drainable connection registry
//
// Key components:
// - table: `localPort=remoteHost:remotePort` route table parsing
// - registry: open connection pairs, each closable through a one-shot signal
// - tcp: listeners, the accept gate and bidirectional splicing

pub mod registry;
pub mod table;
pub mod tcp;

pub use registry::{ConnectionId, ConnectionInfo, ConnectionRegistry, DrainReport};
pub use table::{RelayRoute, RelayTable, RelayTableError};
pub use tcp::{PauseReport, RelayError, RelayStatus, TcpRelay, DEFAULT_CONNECT_TIMEOUT};
