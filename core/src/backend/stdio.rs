/// Stdio backend
///
/// Spawns the configured command with piped stdio and speaks framed JSON-RPC
/// over it via `RpcConnection`. Requests on one backend are single-flight:
/// `issue` holds a backend-scoped lock from write until response, so
/// concurrent callers queue up and are served in order.
use super::process::{ManagedProcess, ProcessState};
use super::rpc::RpcConnection;
use super::{collect_tool_pages, Backend, BackendError};
use crate::config::{ServerSpec, TransportKind};
use crate::protocol::{call_tool_params, initialize_params, ToolDescriptor};
use crate::redact::redact_args;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub struct StdioBackend {
    name: String,
    conn: Arc<RpcConnection<ChildStdin>>,
    /// Serializes request issuance (single-flight per backend)
    issue_lock: Mutex<()>,
    process: ManagedProcess,
}

impl StdioBackend {
    /// Spawn the subprocess and start its read loop
    pub fn spawn(name: &str, spec: &ServerSpec, grace: Duration) -> Result<Self, BackendError> {
        if spec.command.trim().is_empty() {
            return Err(BackendError::MissingField {
                backend: name.to_string(),
                field: "command",
            });
        }

        info!(
            target: "stdio_backend",
            backend = %name,
            command = %spec.command,
            args = %redact_args(&spec.args).join(" "),
            "Spawning stdio backend"
        );

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            error!(target: "stdio_backend", backend = %name, error = %e, "Failed to spawn backend process");
            BackendError::Transport(format!("Failed to spawn process: {}", e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Transport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Transport("Failed to capture stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_forwarder(name, stderr);
        }

        let conn = RpcConnection::new(name, stdin);
        conn.spawn_read_loop(stdout);

        Ok(Self {
            name: name.to_string(),
            conn,
            issue_lock: Mutex::new(()),
            process: ManagedProcess::new(name, child, grace),
        })
    }

    /// One request at a time per backend
    async fn issue(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        let _turn = self.issue_lock.lock().await;
        self.conn.request(method, params).await
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub async fn process_state(&self) -> ProcessState {
        self.process.state().await
    }
}

#[async_trait]
impl Backend for StdioBackend {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        let result = self.issue("initialize", initialize_params()).await?;
        debug!(
            target: "stdio_backend",
            backend = %self.name,
            server = %result.get("serverInfo").cloned().unwrap_or_default(),
            "Initialized"
        );
        // The handshake already succeeded; a lost notification is not fatal
        if let Err(e) = self.conn.notify("notifications/initialized").await {
            warn!(target: "stdio_backend", backend = %self.name, error = %e, "initialized notification failed");
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, BackendError> {
        collect_tool_pages(move |params| self.issue("tools/list", params)).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        debug!(target: "stdio_backend", backend = %self.name, tool = %name, "Calling tool");
        self.issue("tools/call", call_tool_params(name, arguments)).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.conn.close();
        let code = self.process.terminate().await;
        debug!(target: "stdio_backend", backend = %self.name, code = ?code, "Backend closed");
        Ok(())
    }
}

/// Forward the child's stderr into the log, one line per event.
///
/// Drains until EOF whatever the bytes are; undecodable text is logged
/// lossily, so the pipe never closes under a live child.
fn spawn_stderr_forwarder(name: &str, stderr: ChildStderr) {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    info!(target: "backend_stderr", backend = %name, "{}", text.trim_end());
                }
                Err(e) => {
                    debug!(target: "backend_stderr", backend = %name, error = %e, "stderr closed");
                    break;
                }
            }
        }
    });
}
