//! JSON-RPC bridge over a duplex byte stream.
//!
//! One [`Bridge`] owns one tool-server connection:
//! - outgoing requests get a fresh numeric id and a [`PendingRequest`] slot
//! - a reader task feeds inbound bytes through the [`FrameCodec`] and
//!   resolves the slot whose id matches each response
//! - peer requests (`ping`) are answered, notifications go to an optional handler
//! - every slot is resolved exactly once: response, timeout, or closure

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::codec::{self, FrameCodec};
use super::errors::McpError;
use super::types::{
    error_codes, InitializeResult, JsonRpcMessage, ListToolsResult, MessageKind, ToolDescriptor,
    ToolResult, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default deadline for a single outstanding request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Default deadline for the `initialize` handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between closing stdin and force-killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Read buffer size for the inbound stream.
const READ_CHUNK: usize = 16 * 1024;

/// Upper bound on `tools/list` pages followed during discovery.
const MAX_TOOL_PAGES: usize = 32;

// ─── Pending Requests ────────────────────────────────────────────────────────

type Reply = Result<Value, McpError>;

/// One outstanding request awaiting its response.
#[derive(Debug)]
struct PendingRequest {
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<Reply>,
}

/// Correlation table. `closed` lives under the same lock so a request can
/// never be inserted after closure has drained the table.
#[derive(Debug, Default)]
struct PendingTable {
    requests: HashMap<u64, PendingRequest>,
    closed: bool,
}

/// Removes a request's slot when the caller stops waiting (timeout, error,
/// or the caller's future being dropped).
struct PendingGuard<'a> {
    bridge: &'a Bridge,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.bridge.lock_pending().requests.remove(&self.id);
    }
}

/// Callback for unsolicited notifications.
pub type NotificationHandler = Arc<dyn Fn(&JsonRpcMessage) + Send + Sync>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ─── Bridge ──────────────────────────────────────────────────────────────────

/// A multiplexed JSON-RPC connection to one tool server.
pub struct Bridge {
    name: String,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
    request_timeout: Duration,
    notification_handler: Mutex<Option<NotificationHandler>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl Bridge {
    /// Wrap a duplex stream and start the inbound listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(name: &str, reader: R, writer: W, request_timeout: Duration) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let bridge = Arc::new(Self {
            name: name.to_string(),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            pending: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(1),
            request_timeout,
            notification_handler: Mutex::new(None),
            reader_task: Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(
            Arc::downgrade(&bridge),
            name.to_string(),
            reader,
        ));
        *bridge
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        bridge
    }

    /// Hand the bridge ownership of the server process so `shutdown` can end it.
    pub async fn attach_process(&self, child: Child) {
        *self.child.lock().await = Some(child);
    }

    /// Bridge identifier (the server name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the bridge has been torn down.
    pub fn is_closed(&self) -> bool {
        self.lock_pending().closed
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().requests.len()
    }

    /// Register a handler for unsolicited notifications.
    pub fn on_notification<F>(&self, handler: F)
    where
        F: Fn(&JsonRpcMessage) + Send + Sync + 'static,
    {
        *self
            .notification_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    // ─── Protocol Operations ─────────────────────────────────────────────

    /// Perform the capability exchange and send `notifications/initialized`.
    pub async fn initialize(&self, handshake_timeout: Duration) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = tokio::time::timeout(handshake_timeout, self.request("initialize", Some(params)))
            .await
            .map_err(|_| McpError::HandshakeError {
                name: self.name.clone(),
                reason: format!(
                    "no initialize response within {}ms",
                    handshake_timeout.as_millis()
                ),
            })?
            .map_err(|e| McpError::HandshakeError {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        let info: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::HandshakeError {
                name: self.name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        tracing::info!(
            server = %self.name,
            protocol = ?info.protocol_version,
            peer = ?info.server_info.as_ref().and_then(|s| s.name.clone()),
            "tool server handshake complete"
        );

        self.notify("notifications/initialized", None)
            .await
            .map_err(|e| McpError::HandshakeError {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// Safe to call concurrently; responses may arrive in any order.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.lock_pending();
            if table.closed {
                return Err(self.closed_error());
            }
            table.requests.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    issued_at: Instant::now(),
                    tx,
                },
            );
        }
        let _guard = PendingGuard { bridge: self, id };

        self.write(&JsonRpcMessage::request(id, method, params)).await?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                tracing::warn!(
                    server = %self.name,
                    method,
                    id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(McpError::RequestTimeout {
                    server: self.name.clone(),
                    method: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.write(&JsonRpcMessage::notification(method, params)).await
    }

    /// Fetch the server's tools, namespaced by this bridge's name.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut descriptors = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", Some(params)).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("failed to parse tools/list result: {e}"),
                })?;

            descriptors.extend(
                page.tools
                    .into_iter()
                    .map(|tool| ToolDescriptor::from_remote(&self.name, tool)),
            );

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(descriptors)
    }

    /// Invoke a tool by its un-prefixed name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;

        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("failed to parse tools/call result: {e}"),
        })
    }

    /// Tear down the connection, fail all pending requests, end the process.
    pub async fn shutdown(&self) {
        let failed = self.close_pending();
        tracing::info!(server = %self.name, failed_pending = failed, "shutting down bridge");

        // Dropping stdin is the polite shutdown signal for stdio servers.
        self.writer.lock().await.take();

        if let Some(handle) = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(_)) => {}
                _ => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(
                            server = %self.name,
                            error = %e,
                            "failed to kill server process (may have already exited)"
                        );
                    }
                }
            }
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn closed_error(&self) -> McpError {
        McpError::BridgeClosed {
            server: self.name.clone(),
        }
    }

    /// Mark closed and reject every outstanding request. Returns how many failed.
    fn close_pending(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.lock_pending();
            table.closed = true;
            table.requests.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(self.closed_error()));
        }
        count
    }

    async fn write(&self, message: &JsonRpcMessage) -> Result<(), McpError> {
        let bytes = codec::encode(&self.name, message)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.closed_error())?;

        writer
            .write_all(&bytes)
            .await
            .map_err(|e| McpError::TransportError {
                server: self.name.clone(),
                reason: format!("failed to write to stream: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("failed to flush stream: {e}"),
        })
    }

    /// Route one decoded inbound record.
    fn dispatch(self: &Arc<Self>, message: JsonRpcMessage) {
        match message.kind() {
            MessageKind::Response => self.resolve(message),
            MessageKind::Request => self.answer_peer_request(message),
            MessageKind::Notification => {
                let handler = self
                    .notification_handler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                match handler {
                    Some(handler) => handler(&message),
                    None => tracing::debug!(
                        server = %self.name,
                        method = ?message.method,
                        "ignoring notification"
                    ),
                }
            }
            MessageKind::Invalid => {}
        }
    }

    fn resolve(&self, message: JsonRpcMessage) {
        let Some(id) = message.id.as_ref().and_then(|id| id.as_u64()) else {
            tracing::debug!(server = %self.name, id = ?message.id, "response with foreign id");
            return;
        };

        let Some(pending) = self.lock_pending().requests.remove(&id) else {
            tracing::debug!(server = %self.name, id, "response for unknown or expired request");
            return;
        };

        tracing::debug!(
            server = %self.name,
            id,
            method = %pending.method,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "request resolved"
        );

        let reply = match message.error {
            Some(err) => Err(McpError::ToolExecutionError {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        // The caller may have given up already; that is fine.
        let _ = pending.tx.send(reply);
    }

    /// Reply on a separate task; the reader never waits on the writer lock.
    fn answer_peer_request(self: &Arc<Self>, message: JsonRpcMessage) {
        let (Some(id), Some(method)) = (message.id, message.method) else {
            return;
        };
        let reply = if method == "ping" {
            JsonRpcMessage::response(id, json!({}))
        } else {
            tracing::warn!(server = %self.name, method = %method, "server sent unsupported request");
            JsonRpcMessage::error_response(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("client does not implement method '{method}'"),
            )
        };
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = bridge.write(&reply).await {
                tracing::warn!(server = %bridge.name, error = %e, "failed to answer server request");
            }
        });
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(handle) = self
            .reader_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Inbound listener: bytes → records → dispatch. Closes the bridge on EOF.
async fn read_loop<R>(bridge: Weak<Bridge>, name: String, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "failed to read from server stream");
                break;
            }
        };

        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        for record in codec.feed(&buf[..n]) {
            match codec::decode(&name, &record) {
                Ok(message) => bridge.dispatch(message),
                Err(e) => tracing::warn!(
                    server = %name,
                    error = %e,
                    record = %crate::agent_core::tokens::truncate_utf8(&String::from_utf8_lossy(&record), 200),
                    "skipping malformed record"
                ),
            }
        }
    }

    if let Some(bridge) = bridge.upgrade() {
        let failed = bridge.close_pending();
        tracing::warn!(server = %name, failed_pending = failed, "server stream closed");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
