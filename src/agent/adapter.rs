//! Agent child process adapter.
//!
//! Owns exactly one child process: spawns it with stream-JSON flags, reads
//! newline-delimited JSON from stdout, logs stderr, serializes writes to
//! stdin behind a mutex, and tears the child down with a bounded grace
//! period. Parsed messages and process-level events are forwarded through a
//! tokio [`mpsc`] channel in receipt order.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::codec::StreamCodec;
use crate::agent::protocol::{self, AgentMessage};
use crate::{AppError, Result};

/// Capacity of the adapter's outbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events surfaced by the adapter to its consumer.
#[derive(Debug)]
pub enum AgentEvent {
    /// A parsed stream-JSON message from the child's stdout.
    Message(AgentMessage),
    /// The child exited on its own.
    Exited {
        /// Process exit code, `None` when killed by signal.
        code: Option<i32>,
    },
    /// Unrecoverable I/O error on the stdout stream.
    IoError {
        /// Human-readable description.
        message: String,
    },
}

/// Inputs for spawning one agent child.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Agent CLI binary.
    pub command: String,
    /// Extra arguments appended after the built-in flags.
    pub extra_args: Vec<String>,
    /// Working directory the child starts in.
    pub workdir: PathBuf,
    /// MCP server name used as the config key.
    pub server_name: String,
    /// URL of the approval control plane (`…/mcp`).
    pub mcp_url: String,
    /// Fully qualified permission tool identifier.
    pub permission_tool: String,
    /// Prior session id to resume, if any.
    pub resume_session_id: Option<String>,
    /// Grace period between closing stdin and force-kill.
    pub teardown_grace: Duration,
}

/// Live adapter around one agent child process.
pub struct AgentAdapter {
    stdin: Mutex<Option<ChildStdin>>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
    mcp_config: Mutex<Option<tempfile::TempPath>>,
    closed: AtomicBool,
}

impl AgentAdapter {
    /// Spawn the agent child and start its background readers.
    ///
    /// Writes an ephemeral MCP configuration file naming the control-plane
    /// endpoint, launches the child with bidirectional stream-JSON flags
    /// (plus `--resume` when resuming), and starts the stdout reader, the
    /// stderr reader, and the exit monitor. Events arrive on `event_tx` in
    /// receipt order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the config file cannot be written, the
    /// spawn fails, or a pipe is missing. No event is emitted for spawn
    /// failures; the caller owns the error.
    pub fn spawn(options: &SpawnOptions, event_tx: mpsc::Sender<AgentEvent>) -> Result<Self> {
        let config_path = write_mcp_config(&options.server_name, &options.mcp_url)?;

        let mut cmd = Command::new(&options.command);
        cmd.args([
            "--print",
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--mcp-config",
        ]);
        cmd.arg(config_path.as_os_str());
        cmd.args(["--permission-prompt-tool", &options.permission_tool]);
        if let Some(ref prior) = options.resume_session_id {
            cmd.args(["--resume", prior]);
        }
        for arg in &options.extra_args {
            cmd.arg(arg);
        }

        cmd.current_dir(&options.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Process(format!("failed to spawn agent: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Process("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Process("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Process("failed to capture agent stderr".into()))?;

        let cancel = CancellationToken::new();
        spawn_stdout_reader(stdout, event_tx.clone(), cancel.clone());
        spawn_stderr_reader(stderr, cancel.clone());
        let monitor = spawn_exit_monitor(child, event_tx, cancel.clone(), options.teardown_grace);

        info!(
            command = %options.command,
            workdir = %options.workdir.display(),
            resume = options.resume_session_id.as_deref().unwrap_or(""),
            "agent child spawned"
        );

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            cancel,
            monitor: Mutex::new(Some(monitor)),
            mcp_config: Mutex::new(Some(config_path)),
            closed: AtomicBool::new(false),
        })
    }

    /// Channel capacity used for adapter event channels.
    #[must_use]
    pub fn event_channel() -> (mpsc::Sender<AgentEvent>, mpsc::Receiver<AgentEvent>) {
        mpsc::channel(EVENT_CHANNEL_CAPACITY)
    }

    /// Write one user message to the child's stdin as a single NDJSON line.
    ///
    /// Writes are serialized by the internal mutex, so concurrent submitters
    /// never interleave bytes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if stdin is already closed or the write
    /// fails (the child has usually exited).
    pub async fn write_user_message(&self, text: &str) -> Result<()> {
        let value = protocol::user_message(text);
        let mut bytes = serde_json::to_vec(&value)
            .map_err(|e| AppError::Process(format!("failed to serialize user message: {e}")))?;
        bytes.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::Process("agent stdin is closed".into()))?;

        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Process(format!("write to agent stdin failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::Process(format!("flush to agent stdin failed: {e}")))?;
        Ok(())
    }

    /// Close the adapter: signal end-of-input, wait out the grace period,
    /// force-terminate if needed, and remove the temporary config file.
    ///
    /// Idempotent, and safe to call while a reader is observing EOF.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping stdin delivers EOF to the child.
        self.stdin.lock().await.take();
        self.cancel.cancel();

        if let Some(monitor) = self.monitor.lock().await.take() {
            if let Err(err) = monitor.await {
                warn!(%err, "agent exit monitor task panicked");
            }
        }

        // TempPath removes the file on drop.
        self.mcp_config.lock().await.take();
        debug!("agent adapter closed");
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ── Spawn helpers ────────────────────────────────────────────────────────────

/// Write the ephemeral per-session MCP configuration file.
///
/// One server entry keyed by the server name, with an HTTP transport
/// pointing at the broker.
fn write_mcp_config(server_name: &str, mcp_url: &str) -> Result<tempfile::TempPath> {
    let config = serde_json::json!({
        "mcpServers": {
            server_name: {
                "type": "http",
                "url": mcp_url,
            }
        }
    });

    let mut file = tempfile::Builder::new()
        .prefix("agent-relay-mcp-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| AppError::Process(format!("failed to create mcp config: {e}")))?;
    file.write_all(config.to_string().as_bytes())
        .map_err(|e| AppError::Process(format!("failed to write mcp config: {e}")))?;

    Ok(file.into_temp_path())
}

/// Stdout reader task — decodes NDJSON lines and forwards parsed messages.
///
/// Malformed lines are logged and skipped; they never stop the reader. An
/// unrecoverable stream error emits [`AgentEvent::IoError`] and exits.
fn spawn_stdout_reader(
    stdout: ChildStdout,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut framed = FramedRead::new(stdout, StreamCodec::new());

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("stdout reader: cancellation received, stopping");
                    break;
                }

                item = framed.next() => {
                    match item {
                        None => {
                            debug!("stdout reader: EOF");
                            break;
                        }
                        Some(Err(AppError::Process(ref msg))) => {
                            warn!(error = msg.as_str(), "stdout reader: framing error, skipping");
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "stdout reader: stream error, stopping");
                            let _ = event_tx
                                .send(AgentEvent::IoError { message: e.to_string() })
                                .await;
                            break;
                        }
                        Some(Ok(line)) => match protocol::parse_line(&line) {
                            Ok(Some(message)) => {
                                if event_tx.send(AgentEvent::Message(message)).await.is_err() {
                                    debug!("stdout reader: event channel closed, stopping");
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(error = %e, raw_line = %line, "stdout reader: parse error, skipping line");
                            }
                        },
                    }
                }
            }
        }
    })
}

/// Stderr reader task — drains diagnostics into the log.
fn spawn_stderr_reader(stderr: ChildStderr, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => debug!(target: "agent_stderr", "{text}"),
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
    })
}

/// Exit monitor — reports natural exits and runs the graceful teardown when
/// the cancellation token fires first.
fn spawn_exit_monitor(
    mut child: Child,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let code = match result {
                    Ok(status) => status.code(),
                    Err(err) => {
                        warn!(%err, "error waiting for agent child");
                        None
                    }
                };
                if event_tx.send(AgentEvent::Exited { code }).await.is_err() {
                    debug!("exit monitor: event channel closed before exit could be delivered");
                }
            }
            () = cancel.cancelled() => {
                // close() has dropped stdin already; give the child the
                // grace period to exit on EOF, then force-terminate.
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        info!(?status, "agent child exited within grace period");
                    }
                    Ok(Err(err)) => {
                        warn!(%err, "error waiting for agent child during teardown");
                    }
                    Err(_elapsed) => {
                        warn!("agent child did not exit within grace period, killing");
                        if let Err(err) = child.kill().await {
                            warn!(%err, "failed to kill agent child");
                        }
                    }
                }
            }
        }
    })
}
