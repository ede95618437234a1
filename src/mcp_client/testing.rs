//! In-process fake tool server for tests.
//!
//! Speaks the same newline-delimited JSON-RPC as a real server over a
//! `tokio::io::duplex` pipe. Each request is answered on its own task, so
//! delayed replies come back out of order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::transport::{Bridge, DEFAULT_REQUEST_TIMEOUT};
use super::types::{error_codes, JsonRpcMessage, MessageKind, PROTOCOL_VERSION};

type CallHandler = Arc<dyn Fn(&str, &Value) -> FakeReply + Send + Sync>;

/// Shared record of `tools/call` invocations: `(tool name, arguments)`.
pub type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

/// What the fake server answers to one `tools/call`.
#[derive(Debug, Clone)]
pub struct FakeReply {
    outcome: Result<Value, (i64, String)>,
    delay: Option<Duration>,
}

impl FakeReply {
    /// Successful result with one text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(json!({ "content": [{ "type": "text", "text": text.into() }] })),
            delay: None,
        }
    }

    /// Result flagged `isError` by the server.
    pub fn tool_error(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(json!({
                "content": [{ "type": "text", "text": text.into() }],
                "isError": true,
            })),
            delay: None,
        }
    }

    /// JSON-RPC level error response.
    pub fn rpc_error(code: i64, message: impl Into<String>) -> Self {
        Self {
            outcome: Err((code, message.into())),
            delay: None,
        }
    }

    /// Hold the reply back for `delay`.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Builder for a scripted tool server.
pub struct FakeServer {
    name: String,
    tools: Vec<Value>,
    handler: CallHandler,
    failing_method: Option<String>,
    calls: CallLog,
}

impl FakeServer {
    pub fn new(name: &str, tools: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            tools,
            handler: Arc::new(|name, _| FakeReply::text(format!("ok: {name}"))),
            failing_method: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script the `tools/call` answers.
    pub fn on_call<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Value) -> FakeReply + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Answer every request for `method` with an internal error.
    pub fn fail_method(mut self, method: &str) -> Self {
        self.failing_method = Some(method.to_string());
        self
    }

    /// Handle to the call log, readable after `spawn`.
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    /// Start serving and return a connected (not yet initialized) bridge.
    pub fn spawn(self) -> Arc<Bridge> {
        self.spawn_with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn spawn_with_timeout(self, request_timeout: Duration) -> Arc<Bridge> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (client_r, client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);
        let bridge = Bridge::connect(&self.name, client_r, client_w, request_timeout);

        let writer = Arc::new(tokio::sync::Mutex::new(server_w));
        let server = Arc::new(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&line) else {
                    continue;
                };
                if message.kind() != MessageKind::Request {
                    continue;
                }
                let server = Arc::clone(&server);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    let (reply, delay) = server.answer(message);
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    let mut bytes = serde_json::to_vec(&reply).unwrap_or_default();
                    bytes.push(b'\n');
                    let _ = writer.lock().await.write_all(&bytes).await;
                });
            }
        });

        bridge
    }

    fn answer(&self, message: JsonRpcMessage) -> (JsonRpcMessage, Option<Duration>) {
        let id = message.id.clone().unwrap_or(super::types::RequestId::Number(0));
        let method = message.method.clone().unwrap_or_default();
        let params = message.params.unwrap_or(Value::Null);

        if self.failing_method.as_deref() == Some(method.as_str()) {
            let reply = JsonRpcMessage::error_response(id, error_codes::INTERNAL_ERROR, "scripted failure");
            return (reply, None);
        }

        match method.as_str() {
            "initialize" => (
                JsonRpcMessage::response(
                    id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": self.name, "version": "0.0.0" },
                    }),
                ),
                None,
            ),
            "tools/list" => (
                JsonRpcMessage::response(id, json!({ "tools": self.tools })),
                None,
            ),
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                self.calls
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push((name.clone(), args.clone()));

                let reply = (self.handler)(&name, &args);
                let message = match reply.outcome {
                    Ok(result) => JsonRpcMessage::response(id, result),
                    Err((code, msg)) => JsonRpcMessage::error_response(id, code, msg),
                };
                (message, reply.delay)
            }
            other => (
                JsonRpcMessage::error_response(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method '{other}'"),
                ),
                None,
            ),
        }
    }
}

/// A browser-automation style tool set.
pub fn browser_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "browser_navigate",
            "description": "Navigate to a URL",
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}
        }),
        json!({
            "name": "browser_click",
            "description": "Click an element on the page",
            "inputSchema": {"type": "object", "properties": {"element": {"type": "string"}, "selector": {"type": "string"}}}
        }),
        json!({
            "name": "browser_type",
            "description": "Type text into an element",
            "inputSchema": {"type": "object", "properties": {"selector": {"type": "string"}, "text": {"type": "string"}}, "required": ["text"]}
        }),
        json!({
            "name": "browser_snapshot",
            "description": "Capture an accessibility snapshot",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "browser_take_screenshot",
            "description": "Take a screenshot of the page",
            "inputSchema": {"type": "object", "properties": {"filename": {"type": "string"}}}
        }),
        json!({
            "name": "browser_close",
            "description": "Close the browser",
            "inputSchema": {"type": "object", "properties": {}}
        }),
    ]
}
