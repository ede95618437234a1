//! Server process lifecycle management.
//!
//! Spawns tool-server child processes, wires their stdio into a [`Bridge`],
//! runs the handshake, and shuts them down. Each server runs as a separate
//! OS process communicating via JSON-RPC over stdio.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

use super::errors::McpError;
use super::transport::{Bridge, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use super::types::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Lines of stderr kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

// ─── Settings ────────────────────────────────────────────────────────────────

/// Timeouts applied to every bridge.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a single tool server and perform the initialization handshake.
///
/// On handshake failure the process is killed and the recent stderr output
/// is attached to the error.
pub async fn spawn_server(
    name: &str,
    config: &ServerConfig,
    settings: BridgeSettings,
) -> Result<Arc<Bridge>, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(dir) = config.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr_tail = child
        .stderr
        .take()
        .map(|stderr| drain_stderr(name, stderr))
        .unwrap_or_default();

    let bridge = Bridge::connect(name, stdout, stdin, settings.request_timeout);
    bridge.attach_process(child).await;

    if let Err(e) = bridge.initialize(settings.handshake_timeout).await {
        bridge.shutdown().await;
        let stderr_ctx = stderr_tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if !stderr_ctx.is_empty() {
            tracing::warn!(
                server = name,
                stderr = %stderr_ctx,
                "server stderr captured on handshake failure"
            );
        }
        let reason = match e {
            McpError::HandshakeError { reason, .. } => reason,
            other => other.to_string(),
        };
        return Err(McpError::HandshakeError {
            name: name.to_string(),
            reason: format!("{reason}{}", format_stderr_suffix(&stderr_ctx)),
        });
    }

    tracing::info!(server = name, command = %config.command, "tool server started");
    Ok(bridge)
}

/// Forward stderr to the log and keep the last few lines.
///
/// Reading continuously keeps a chatty server from blocking on a full pipe.
fn drain_stderr(name: &str, stderr: ChildStderr) -> Arc<Mutex<VecDeque<String>>> {
    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
    let sink = Arc::clone(&tail);
    let server = name.to_string();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, line = %line, "server stderr");
            let mut buf = sink.lock().unwrap_or_else(|e| e.into_inner());
            if buf.len() == STDERR_TAIL_LINES {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    });

    tail
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Batch Operations ────────────────────────────────────────────────────────

/// Spawn all configured servers concurrently.
///
/// Servers that fail to start are returned alongside their error; the
/// others remain usable (partial startup is acceptable).
pub async fn spawn_all_servers(
    configs: &HashMap<String, ServerConfig>,
    settings: BridgeSettings,
) -> (Vec<Arc<Bridge>>, Vec<(String, McpError)>) {
    let mut names: Vec<&String> = configs.keys().collect();
    names.sort();

    let attempts = names.iter().map(|name| async move {
        let config = &configs[name.as_str()];
        (name.to_string(), spawn_server(name, config, settings).await)
    });

    let mut bridges = Vec::new();
    let mut errors = Vec::new();
    for (name, outcome) in futures::future::join_all(attempts).await {
        match outcome {
            Ok(bridge) => bridges.push(bridge),
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "tool server failed to start");
                errors.push((name, e));
            }
        }
    }

    (bridges, errors)
}

/// Shut down all bridges.
pub async fn shutdown_all(bridges: &[Arc<Bridge>]) {
    futures::future::join_all(bridges.iter().map(|b| b.shutdown())).await;
}
