//! Subprocess lifecycle for one stdio-transport MCP server: spawn with an inherited-plus-overlaid
//! environment, send/receive over stdin/stdout, capture a stderr tail for diagnostics, and a
//! terminate→wait→kill shutdown escalation.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::mcp::config::{resolve_command, MCPServerSpec};
use crate::mcp::protocol::{RpcRequest, RpcResponse};

const STDERR_TAIL_MAX_LINES: usize = 20;

/// One running MCP server child process plus its stdio pipes. Requests to the same process are
/// serialized by the `stdin`/`stdout` mutex: only one RPC is in flight per session at a time,
/// since a caller must hold the lock across the whole request/response round-trip.
pub struct McpProcess {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl McpProcess {
    pub async fn spawn(spec: &MCPServerSpec) -> AppResult<Self> {
        let command = resolve_command(&spec.command);
        let mut cmd = tokio::process::Command::new(&command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::MCPTransportBroken(format!("failed to spawn '{}': {}", command, e)))?;

        // Detect an immediate exit (misconfigured command, missing binary resolved but failing
        // instantly) and surface the stderr tail as a diagnostic rather than a bare transport error.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if let Ok(Some(status)) = child.try_wait() {
            let stderr_tail = Self::drain_stderr_tail(&mut child).await;
            return Err(AppError::MCPTransportBroken(format!(
                "server '{}' exited immediately with {}: {}",
                spec.name, status, stderr_tail
            )));
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::MCPTransportBroken("child has no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::MCPTransportBroken("child has no stdout pipe".to_string()))?;

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        })
    }

    async fn drain_stderr_tail(child: &mut Child) -> String {
        let Some(stderr) = child.stderr.take() else { return String::new() };
        let mut reader = BufReader::new(stderr).lines();
        let mut collected = Vec::new();
        while collected.len() < STDERR_TAIL_MAX_LINES {
            match reader.next_line().await {
                Ok(Some(line)) => collected.push(line),
                _ => break,
            }
        }
        collected.join("\n")
    }

    /// Sends one JSON-RPC request and waits for the matching newline-framed response, bounded by
    /// `timeout_secs`. A broken pipe here means the caller must mark the owning session
    /// disconnected; there is no auto-reconnect.
    pub async fn send_request(&self, request: &RpcRequest, timeout_secs: u64) -> AppResult<RpcResponse> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(request.to_line().as_bytes())
            .await
            .map_err(|e| AppError::MCPTransportBroken(format!("write failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::MCPTransportBroken(format!("flush failed: {}", e)))?;
        drop(stdin);

        let expected_id = request.id.clone();
        let read_fut = async {
            let mut stdout = self.stdout.lock().await;
            loop {
                let mut line = String::new();
                let n = stdout
                    .read_line(&mut line)
                    .await
                    .map_err(|e| AppError::MCPTransportBroken(format!("read failed: {}", e)))?;
                if n == 0 {
                    return Err(AppError::MCPTransportBroken("server closed stdout".to_string()));
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response: RpcResponse = serde_json::from_str(trimmed)
                    .map_err(|e| AppError::MCPTransportBroken(format!("malformed response line: {}", e)))?;
                if response.id.as_deref() == Some(expected_id.as_str()) || response.id.is_none() {
                    return Ok(response);
                }
                // A stray response for a previous (already-timed-out) request; keep reading.
                log::debug!("discarding MCP response for stale id {:?}", response.id);
            }
        };

        match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), read_fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::MCPTimeout(timeout_secs)),
        }
    }

    /// Graceful-then-forceful shutdown: SIGTERM-equivalent `start_kill` is not issued directly —
    /// Rust's `Child::kill` is already forceful, so the grace period here lets the process exit
    /// on its own (e.g. on stdin close) before escalating, mirroring
    /// `mcp_client.py::shutdown`'s terminate→wait→kill sequence.
    pub async fn shutdown(&self, grace_period: std::time::Duration) {
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}
