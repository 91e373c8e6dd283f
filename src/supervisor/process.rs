// ABOUTME: Process supervision for one external executable: start, exit watching and stop
//
// Each start spawns the configured program with piped output and hands the child to
// an exit watcher task. The watcher owns the child and publishes its final state over
// a watch channel, which is how both stop() and liveness checks learn about exits,
// including deaths the supervisor did not cause. No automatic restart happens here.

#![allow(clippy::option_if_let_else)]

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info};

use super::output::{spawn_pump, LineSink, MuteHandle};
use super::probe::LivenessProbe;

/// Errors that can occur during process supervision
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Process spawn failed
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Invalid command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The stop signal could not be delivered
    #[error("Failed to signal process {pid}: {source}")]
    SignalFailed {
        /// Target process ID
        pid: u32,
        /// Underlying errno
        #[source]
        source: Errno,
    },

    /// The exit watcher went away without reporting an exit
    #[error("Exit of process {0} was not observed")]
    ExitNotObserved(u32),
}

/// Current state of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,

    /// Process is running with the given PID
    Running {
        /// Process ID
        pid: u32,
    },

    /// Process exited normally with exit code
    Exited {
        /// Exit code from the process
        code: i32,
    },

    /// Process was terminated by a signal
    Signaled {
        /// Signal number that terminated the process
        signal: i32,
    },

    /// Process failed to start or run
    Failed {
        /// Description of the failure
        reason: String,
    },
}

impl ProcessState {
    /// Returns true if the process is currently running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited { code };
        }

        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(signal) => Self::Signaled { signal },
            None => Self::Failed {
                reason: "Unknown termination".to_string(),
            },
        }
    }
}

/// How a running process is asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopStrategy {
    /// SIGTERM, then wait for the process to exit on its own terms
    #[default]
    Graceful,

    /// SIGKILL, for wrapped binaries that do not exit cleanly on SIGTERM
    ForceKill,
}

impl StopStrategy {
    const fn signal(self) -> Signal {
        match self {
            Self::Graceful => Signal::SIGTERM,
            Self::ForceKill => Signal::SIGKILL,
        }
    }
}

/// What to run: a logical name, an executable and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Name used in logs and status reports
    pub name: String,

    /// Executable name or path
    pub program: String,

    /// Arguments passed on every start
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Create a spec from a name, program and arguments
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// The live half of a supervised process
struct RunningProcess {
    pid: u32,
    state: watch::Receiver<ProcessState>,
}

/// Supervisor owning at most one live OS process for a logical service.
///
/// Not internally synchronized: callers that share a supervisor wrap it in a
/// mutex so start, stop and binary switches are serialized.
pub struct ProcessSupervisor {
    spec: ProcessSpec,
    stop_strategy: StopStrategy,
    sink: Arc<dyn LineSink>,
    mute: MuteHandle,
    current: Option<RunningProcess>,
    last_state: ProcessState,
    program_tx: watch::Sender<String>,
    pid_tx: watch::Sender<Option<u32>>,
}

impl ProcessSupervisor {
    /// Create a supervisor; nothing is spawned until [`start`](Self::start)
    pub fn new(spec: ProcessSpec, stop_strategy: StopStrategy, sink: Arc<dyn LineSink>) -> Self {
        let (program_tx, _) = watch::channel(spec.program.clone());
        let (pid_tx, _) = watch::channel(None);
        Self {
            spec,
            stop_strategy,
            sink,
            mute: MuteHandle::default(),
            current: None,
            last_state: ProcessState::NotStarted,
            program_tx,
            pid_tx,
        }
    }

    /// Logical service name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Executable started by the next [`start`](Self::start)
    pub fn program(&self) -> &str {
        &self.spec.program
    }

    /// Full process spec
    pub const fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Bind the supervisor to a different executable.
    ///
    /// Takes effect on the next start; a running process is left alone.
    pub fn set_program(&mut self, program: impl Into<String>) {
        self.spec.program = program.into();
        self.program_tx.send_replace(self.spec.program.clone());
    }

    /// Handle controlling whether output lines are logged
    pub fn mute_handle(&self) -> MuteHandle {
        self.mute.clone()
    }

    /// Liveness view that does not need access to the supervisor
    pub fn liveness_probe(&self) -> LivenessProbe {
        LivenessProbe::new(
            self.spec.name.clone(),
            self.program_tx.subscribe(),
            self.pid_tx.subscribe(),
        )
    }

    /// Whether the process started by this supervisor is still alive
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|running| running.state.borrow().is_running())
    }

    /// PID of the live process, if any
    pub fn pid(&self) -> Option<u32> {
        self.is_running()
            .then(|| self.current.as_ref().map(|running| running.pid))
            .flatten()
    }

    /// Current state, including how the last process ended
    pub fn state(&self) -> ProcessState {
        match &self.current {
            Some(running) => running.state.borrow().clone(),
            None => self.last_state.clone(),
        }
    }

    /// Spawn the configured executable.
    ///
    /// Returns `Ok(false)` without spawning if a process is already running.
    #[allow(clippy::unused_async)] // async for API consistency with stop()
    pub async fn start(&mut self) -> Result<bool, SupervisorError> {
        info!(service = %self.spec.name, "Starting");

        if let Some(pid) = self.pid() {
            info!(service = %self.spec.name, pid = pid, "Already started");
            return Ok(false);
        }
        self.forget_exited();

        if self.spec.program.is_empty() {
            return Err(SupervisorError::InvalidCommand(
                "Command cannot be empty".to_string(),
            ));
        }

        let program = which::which(&self.spec.program).map_err(|e| {
            SupervisorError::InvalidCommand(format!("{}: {e}", self.spec.program))
        })?;

        let mut child = Command::new(&program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::SpawnFailed)?;

        let pid = child.id().unwrap_or(0);

        spawn_pump(
            self.spec.name.clone(),
            child.stdout.take(),
            child.stderr.take(),
            Arc::clone(&self.sink),
            self.mute.clone(),
        );

        let (state_tx, state_rx) = watch::channel(ProcessState::Running { pid });
        tokio::spawn(watch_exit(self.spec.name.clone(), child, state_tx));

        self.current = Some(RunningProcess {
            pid,
            state: state_rx,
        });
        self.pid_tx.send_replace(Some(pid));

        info!(
            service = %self.spec.name,
            pid = pid,
            program = %program.display(),
            "Started"
        );

        Ok(true)
    }

    /// Signal the process with the configured stop strategy and wait for it to exit.
    ///
    /// Returns `Ok(false)` if nothing was running.
    pub async fn stop(&mut self) -> Result<bool, SupervisorError> {
        info!(service = %self.spec.name, "Stopping");

        let Some(pid) = self.pid() else {
            info!(service = %self.spec.name, "Already stopped");
            self.forget_exited();
            return Ok(false);
        };

        let signal = self.stop_strategy.signal();

        // PIDs handed out by the kernel always fit in i32
        #[allow(clippy::cast_possible_wrap)]
        let target = Pid::from_raw(pid as i32);

        match kill(target, signal) {
            Ok(()) => debug!(service = %self.spec.name, pid = pid, signal = %signal, "Signal sent"),
            Err(Errno::ESRCH) => debug!(service = %self.spec.name, pid = pid, "Process already gone"),
            Err(source) => return Err(SupervisorError::SignalFailed { pid, source }),
        }

        let final_state = self.wait().await.ok_or(SupervisorError::ExitNotObserved(pid))?;

        self.current = None;
        self.last_state = final_state;
        self.pid_tx.send_replace(None);

        info!(service = %self.spec.name, pid = pid, state = ?self.last_state, "Stopped");

        Ok(true)
    }

    /// Wait until the current process exits and return its final state.
    ///
    /// Returns `None` if no process was started or the exit watcher vanished.
    pub async fn wait(&self) -> Option<ProcessState> {
        let mut state = self.current.as_ref()?.state.clone();
        let final_state = state.wait_for(|s| !s.is_running()).await.ok()?.clone();
        Some(final_state)
    }

    /// Move an exited process out of `current` so its end state is kept for reporting
    fn forget_exited(&mut self) {
        let exited = self
            .current
            .as_ref()
            .is_some_and(|running| !running.state.borrow().is_running());
        if exited {
            if let Some(running) = self.current.take() {
                self.last_state = running.state.borrow().clone();
            }
        }
    }
}

/// Own the child until it exits, then publish how it ended.
async fn watch_exit(name: String, mut child: Child, state: watch::Sender<ProcessState>) {
    let pid = child.id().unwrap_or(0);

    let final_state = match child.wait().await {
        Ok(status) => ProcessState::from_exit_status(status),
        Err(e) => ProcessState::Failed {
            reason: format!("Waiting for process failed: {e}"),
        },
    };

    info!(service = %name, pid = pid, state = ?final_state, "Died");
    state.send_replace(final_state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::output::{LogOnly, OutputStream};
    use std::sync::Mutex;
    use std::time::Duration;

    fn supervisor(program: &str, args: &[&str], strategy: StopStrategy) -> ProcessSupervisor {
        ProcessSupervisor::new(
            ProcessSpec::new("test", program, args.iter().copied()),
            strategy,
            Arc::new(LogOnly),
        )
    }

    // ==================== ProcessState Tests ====================

    #[test]
    fn test_process_state_is_running() {
        assert!(!ProcessState::NotStarted.is_running());
        assert!(ProcessState::Running { pid: 123 }.is_running());
        assert!(!ProcessState::Exited { code: 0 }.is_running());
        assert!(!ProcessState::Signaled { signal: 9 }.is_running());
        assert!(
            !ProcessState::Failed {
                reason: "test".to_string()
            }
            .is_running()
        );
    }

    #[test]
    fn test_stop_strategy_signals() {
        assert_eq!(StopStrategy::default(), StopStrategy::Graceful);
        assert_eq!(StopStrategy::Graceful.signal(), Signal::SIGTERM);
        assert_eq!(StopStrategy::ForceKill.signal(), Signal::SIGKILL);
    }

    // ==================== ProcessSupervisor Tests ====================

    #[test]
    fn test_supervisor_new() {
        let supervisor = supervisor("sleep", &["10"], StopStrategy::Graceful);

        assert_eq!(supervisor.name(), "test");
        assert_eq!(supervisor.program(), "sleep");
        assert_eq!(supervisor.state(), ProcessState::NotStarted);
        assert!(!supervisor.is_running());
        assert!(supervisor.pid().is_none());
    }

    #[tokio::test]
    async fn test_start_twice_keeps_existing_process() {
        let mut supervisor = supervisor("sleep", &["10"], StopStrategy::Graceful);

        assert!(supervisor.start().await.unwrap());
        let pid = supervisor.pid().expect("running process has a pid");

        assert!(!supervisor.start().await.unwrap());
        assert_eq!(supervisor.pid(), Some(pid));

        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_not_running_is_noop() {
        let mut supervisor = supervisor("sleep", &["10"], StopStrategy::Graceful);

        assert!(!supervisor.stop().await.unwrap());
        assert_eq!(supervisor.state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn test_graceful_stop_sends_sigterm() {
        let mut supervisor = supervisor("sleep", &["30"], StopStrategy::Graceful);
        supervisor.start().await.unwrap();

        assert!(supervisor.stop().await.unwrap());
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.state(), ProcessState::Signaled { signal: 15 });
    }

    #[tokio::test]
    async fn test_force_kill_stop_sends_sigkill() {
        let mut supervisor = supervisor("sh", &["-c", "trap '' TERM; sleep 30"], StopStrategy::ForceKill);
        supervisor.start().await.unwrap();

        assert!(supervisor.stop().await.unwrap());
        assert_eq!(supervisor.state(), ProcessState::Signaled { signal: 9 });
    }

    #[tokio::test]
    async fn test_exit_watcher_clears_liveness() {
        let mut supervisor = supervisor("sh", &["-c", "exit 3"], StopStrategy::Graceful);
        supervisor.start().await.unwrap();

        let final_state = tokio::time::timeout(Duration::from_secs(5), supervisor.wait())
            .await
            .expect("process should exit");

        assert_eq!(final_state, Some(ProcessState::Exited { code: 3 }));
        assert!(!supervisor.is_running());
        assert!(!supervisor.stop().await.unwrap());
        assert_eq!(supervisor.state(), ProcessState::Exited { code: 3 });
    }

    #[tokio::test]
    async fn test_restart_after_death_spawns_new_process() {
        let mut supervisor = supervisor("sh", &["-c", "exit 0"], StopStrategy::Graceful);
        supervisor.start().await.unwrap();
        supervisor.wait().await;

        assert!(supervisor.start().await.unwrap());
        supervisor.wait().await;
        assert_eq!(supervisor.state(), ProcessState::Exited { code: 0 });
    }

    #[tokio::test]
    async fn test_empty_command_fails() {
        let mut supervisor = supervisor("", &[], StopStrategy::Graceful);

        let result = supervisor.start().await;
        assert!(matches!(result, Err(SupervisorError::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let mut supervisor = supervisor(
            "/nonexistent/command/that/does/not/exist",
            &[],
            StopStrategy::Graceful,
        );

        let result = supervisor.start().await;
        assert!(matches!(result, Err(SupervisorError::InvalidCommand(_))));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_output_reaches_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink = move |stream: OutputStream, line: &str| {
            captured.lock().unwrap().push((stream, line.to_string()));
        };
        let mut supervisor = ProcessSupervisor::new(
            ProcessSpec::new("echo", "sh", ["-c", "echo hello; echo oops >&2"]),
            StopStrategy::Graceful,
            Arc::new(sink),
        );

        supervisor.start().await.unwrap();
        supervisor.wait().await;

        // Output may still be in flight after the exit is reported
        for _ in 0..50 {
            if lines.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let lines = lines.lock().unwrap();
        assert!(lines.contains(&(OutputStream::Stdout, "hello".to_string())));
        assert!(lines.contains(&(OutputStream::Stderr, "oops".to_string())));
    }

    #[tokio::test]
    async fn test_liveness_probe_follows_supervisor() {
        let mut supervisor = supervisor("sleep", &["30"], StopStrategy::Graceful);
        let probe = supervisor.liveness_probe();
        assert_eq!(probe.pid(), None);

        supervisor.start().await.unwrap();
        assert_eq!(probe.pid(), supervisor.pid());

        supervisor.set_program("sh");
        assert_eq!(probe.program(), "sh");

        supervisor.stop().await.unwrap();
        assert_eq!(probe.pid(), None);
    }

    #[tokio::test]
    async fn test_set_program_applies_on_next_start() {
        let mut supervisor = supervisor("sleep", &["30"], StopStrategy::Graceful);
        supervisor.start().await.unwrap();
        let first = supervisor.pid().unwrap();

        supervisor.set_program("sh");
        assert_eq!(supervisor.pid(), Some(first));

        supervisor.stop().await.unwrap();
        supervisor.spec.args = vec!["-c".to_string(), "sleep 30".to_string()];
        supervisor.start().await.unwrap();
        assert_ne!(supervisor.pid(), Some(first));

        supervisor.stop().await.unwrap();
    }
}
