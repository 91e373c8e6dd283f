// ABOUTME: Liveness probe against the OS process table using pgrep
//
// LivenessProbe reads the supervisor's published program and PID from watch
// channels, so status queries never wait on the supervisor while it is busy
// stopping, switching binaries or wiping state.

use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::warn;

/// Longest process name the kernel reports in the process table
const MAX_COMM_LEN: usize = 15;

/// Name a program shows up under in the process table.
///
/// The kernel truncates `comm` to 15 bytes, so an exact match must use the
/// truncated basename.
pub fn process_name(program: &str) -> String {
    let base = Path::new(program)
        .file_name()
        .map_or_else(|| program.to_string(), |name| name.to_string_lossy().into_owned());

    base.chars().take(MAX_COMM_LEN).collect()
}

/// Check whether any process with this program's name is running.
pub async fn is_running_by_name(program: &str) -> std::io::Result<bool> {
    let name = process_name(program);
    if name.is_empty() {
        return Ok(false);
    }

    let status = Command::new("pgrep")
        .arg("-x")
        .arg(&name)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        other => Err(std::io::Error::other(format!(
            "pgrep exited with {other:?} for {name}"
        ))),
    }
}

/// Status-side view of a supervisor
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    name: String,
    program: watch::Receiver<String>,
    pid: watch::Receiver<Option<u32>>,
}

impl LivenessProbe {
    pub(crate) const fn new(
        name: String,
        program: watch::Receiver<String>,
        pid: watch::Receiver<Option<u32>>,
    ) -> Self {
        Self { name, program, pid }
    }

    /// Executable the supervisor is currently bound to
    pub fn program(&self) -> String {
        self.program.borrow().clone()
    }

    /// PID of the last process the supervisor started and has not stopped
    pub fn pid(&self) -> Option<u32> {
        *self.pid.borrow()
    }

    /// Liveness as seen in the OS process table, by executable name.
    ///
    /// Covers processes left behind by an earlier supervisor instance. Falls back
    /// to signalling the tracked PID when the process table cannot be queried.
    pub async fn is_alive(&self) -> bool {
        let program = self.program();
        match is_running_by_name(&program).await {
            Ok(running) => running,
            Err(e) => {
                warn!(
                    service = %self.name,
                    error = %e,
                    "Process table query failed, checking tracked pid"
                );
                self.tracked_pid_alive()
            }
        }
    }

    fn tracked_pid_alive(&self) -> bool {
        self.pid().is_some_and(|pid| {
            // PIDs handed out by the kernel always fit in i32
            #[allow(clippy::cast_possible_wrap)]
            let target = Pid::from_raw(pid as i32);
            kill(target, None::<Signal>).is_ok()
        })
    }
}
