// ABOUTME: Supervision of a single external executable and its line-oriented output
//
// Key components:
// - process: ProcessSupervisor with start/stop, exit watching and stop strategies
// - output: line pumping from stdout/stderr into a pluggable LineSink
// - probe: out-of-band liveness check against the OS process table

pub mod output;
pub mod probe;
pub mod process;

pub use output::{LineSink, LogOnly, MuteHandle, OutputStream};
pub use probe::LivenessProbe;
pub use process::{ProcessSpec, ProcessState, ProcessSupervisor, StopStrategy, SupervisorError};
