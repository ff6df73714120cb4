//! Stdio transport for child-process servers
//!
//! [`StdioTransport`] spawns the configured command on every
//! [`Transport::connect`] and talks to it over its stdin/stdout pipes using
//! newline-delimited JSON.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as one JSON object
//!   followed by `\n`.
//! - Stdout is read line by line. Each trimmed, non-empty line that parses
//!   as JSON is delivered as one [`TransportEvent::Message`]. Anything else
//!   (banners, progress bars) is dropped.
//! - Each stderr line is delivered as a [`TransportEvent::Diagnostic`] and
//!   logged at `DEBUG`. Stderr output is never an error condition.
//!
//! # Lifecycle
//!
//! When stdout reaches EOF without a deliberate [`Transport::close`], the
//! exit status is collected and reported as [`TransportEvent::Closed`].
//! `close` and `Drop` send SIGTERM (Unix) or `start_kill` (elsewhere) to the
//! child.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{McpError, Result};
use crate::transport::{Inbound, Transport, TransportEvent, TransportKind};

/// How long `close` waits for the child to exit after SIGTERM.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long the stdout reader waits for an exit status after EOF.
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(500);

/// Stdio-based transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcplink::transport::stdio::StdioTransport;
/// use mcplink::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> mcplink::Result<()> {
/// let transport = StdioTransport::new(
///     "files".into(),
///     "npx".into(),
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     HashMap::new(),
///     None,
/// );
/// let _inbound = transport.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Server name, used in log targets.
    server: String,
    executable: PathBuf,
    args: Vec<String>,
    /// Variables layered on top of the inherited environment.
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    /// The live child process, if any.
    connection: Mutex<Option<StdioConnection>>,
}

#[derive(Debug)]
struct StdioConnection {
    /// Feeds the stdin writer task.
    stdin_tx: mpsc::UnboundedSender<String>,
    child: Arc<Mutex<Child>>,
    /// Set before a deliberate close so EOF is not reported as a loss.
    closing: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Describe a child-process transport. Nothing is spawned until
    /// [`Transport::connect`].
    ///
    /// The child inherits the parent environment with `env` applied on
    /// top, so launchers such as `npx` still find `PATH`.
    pub fn new(
        server: String,
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            server,
            executable,
            args,
            env,
            working_dir,
            connection: Mutex::new(None),
        }
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.envs(&self.env);
        cmd.kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            McpError::Transport(format!(
                "failed to spawn server `{}`: {}",
                self.executable.display(),
                e
            ))
        })
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Spawn the child process and wire up its pipes.
    ///
    /// Any previous child is terminated first.
    async fn connect(&self) -> Result<Inbound> {
        self.close().await?;

        let mut child = self.spawn_child()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Transport("child stderr unavailable after spawn".into()))?;

        tracing::debug!(
            server = %self.server,
            pid = ?child.id(),
            "spawned stdio server `{}`",
            self.executable.display()
        );

        let child = Arc::new(Mutex::new(child));
        let closing = Arc::new(AtomicBool::new(false));
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // stdin writer
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // stdout reader; reports process exit on EOF
        {
            let event_tx = event_tx.clone();
            let child = Arc::clone(&child);
            let closing = Arc::clone(&closing);
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if serde_json::from_str::<serde_json::Value>(trimmed).is_err() {
                        tracing::trace!(server = %server, "dropping non-JSON stdout line: {}", trimmed);
                        continue;
                    }
                    if event_tx
                        .send(TransportEvent::Message(trimmed.to_string()))
                        .is_err()
                    {
                        return;
                    }
                }

                if closing.load(Ordering::SeqCst) {
                    return;
                }

                let reason = {
                    let mut child = child.lock().await;
                    match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
                        Ok(Ok(status)) => format!("process exited with {}", status),
                        Ok(Err(e)) => format!("process wait failed: {}", e),
                        Err(_) => "process closed stdout".to_string(),
                    }
                };
                tracing::info!(server = %server, "stdio server disconnected: {}", reason);
                let _ = event_tx.send(TransportEvent::Closed(reason));
            });
        }

        // stderr reader
        {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(
                        target: "mcplink::transport::stdio",
                        server = %server,
                        "server stderr: {}",
                        line
                    );
                    if event_tx.send(TransportEvent::Diagnostic(line)).is_err() {
                        break;
                    }
                }
            });
        }

        *self.connection.lock().await = Some(StdioConnection {
            stdin_tx,
            child,
            closing,
        });

        Ok(event_rx)
    }

    /// Enqueue a message for the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if no child is running or its stdin
    /// writer has exited.
    async fn send(&self, message: String) -> Result<()> {
        let guard = self.connection.lock().await;
        let connection = guard
            .as_ref()
            .ok_or_else(|| McpError::Transport("stdio transport is not connected".into()))?;
        connection
            .stdin_tx
            .send(message)
            .map_err(|e| McpError::Transport(format!("stdin channel closed: {}", e)))
    }

    /// Terminate the child process, if one is running.
    async fn close(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        connection.closing.store(true, Ordering::SeqCst);
        drop(connection.stdin_tx);

        let mut child = connection.child.lock().await;
        terminate(&mut child);
        if tokio::time::timeout(TERMINATE_GRACE, child.wait())
            .await
            .is_err()
        {
            tracing::warn!(server = %self.server, "server ignored SIGTERM; killing");
            let _ = child.kill().await;
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

/// Ask the child to exit without blocking.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of a still-running child.
    ///
    /// If either lock is contended the kill is skipped; `kill_on_drop`
    /// still reaps the child when its handle is released.
    fn drop(&mut self) {
        if let Ok(mut guard) = self.connection.try_lock() {
            if let Some(connection) = guard.take() {
                connection.closing.store(true, Ordering::SeqCst);
                if let Ok(mut child) = connection.child.try_lock() {
                    terminate(&mut child);
                }
            }
        }
    }
}
