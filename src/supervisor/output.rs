// ABOUTME: Line pumping from supervised process output into a pluggable sink
//
// stdout and stderr are each read line by line and forwarded over a single channel
// to one dispatcher task, so the sink sees every stream's lines in the order the
// process wrote them. Logging can be muted without stopping delivery to the sink.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Receives every output line of a supervised process.
///
/// Called from a single dispatcher task, so implementations see lines in
/// arrival order and must not block.
pub trait LineSink: Send + Sync {
    /// Handle one line, without its trailing newline.
    fn on_line(&self, stream: OutputStream, line: &str);
}

impl<F> LineSink for F
where
    F: Fn(OutputStream, &str) + Send + Sync,
{
    fn on_line(&self, stream: OutputStream, line: &str) {
        self(stream, line);
    }
}

/// Sink for processes whose output is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnly;

impl LineSink for LogOnly {
    fn on_line(&self, _stream: OutputStream, _line: &str) {}
}

/// Shared switch that suppresses output logging.
#[derive(Debug, Clone, Default)]
pub struct MuteHandle(Arc<AtomicBool>);

impl MuteHandle {
    /// Stop logging output lines
    pub fn mute(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Resume logging output lines
    pub fn unmute(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    /// Whether output logging is currently suppressed
    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Spawn the reader and dispatcher tasks for one process run.
///
/// The returned handle completes once both streams have closed and every
/// line has been handed to the sink.
pub fn spawn_pump<O, E>(
    service: String,
    stdout: Option<O>,
    stderr: Option<E>,
    sink: Arc<dyn LineSink>,
    mute: MuteHandle,
) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    if let Some(stdout) = stdout {
        tokio::spawn(read_lines(stdout, OutputStream::Stdout, tx.clone()));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(read_lines(stderr, OutputStream::Stderr, tx.clone()));
    }
    drop(tx);

    tokio::spawn(async move {
        while let Some((stream, line)) = rx.recv().await {
            if !mute.is_muted() {
                info!(service = %service, stream = %stream, "{line}");
            }
            sink.on_line(stream, &line);
        }
        debug!(service = %service, "Process output closed");
    })
}

/// Read raw lines so that non UTF-8 output does not end the stream.
async fn read_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<(OutputStream, String)>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(stream = %stream, error = %e, "Failed to read process output");
                break;
            }
        }
    }
}
