//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests to the configured endpoint
//! and turns the reply into text plus tool-call requests. The conversation
//! engine only depends on the [`ModelService`] trait, so tests substitute a
//! scripted service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::repair::repair_tool_arguments;
use super::types::{ChatCompletionRequest, ChatMessage, ModelReply, ModelRequest, ToolCall};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ModelService ────────────────────────────────────────────────────────────

/// The minimal contract the engine needs from a language model.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// One completion: directive + catalog + history in, text and/or tool calls out.
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, InferenceError>;

    /// Human-readable model identifier, for logs.
    fn model_name(&self) -> &str;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelConfig,
}

impl InferenceClient {
    /// Create a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send a non-streaming chat completion request.
    pub async fn chat_completion(&self, request: ModelRequest) -> Result<ModelReply, InferenceError> {
        let url = self.endpoint("chat/completions");

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ChatMessage::system(request.system));
        }
        messages.extend(request.messages);

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools)
        };

        let body = ChatCompletionRequest {
            model: self.config.model_name.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        // Log the request metadata (not the full body; it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            "model request"
        );

        let response = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let err = InferenceError::from_status(status.as_u16(), body_text);
            tracing::warn!(status = status.as_u16(), overloaded = err.is_overloaded(), "model request failed");
            return Err(err);
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ResponseParseError {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_chat_completion(&body_text)
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ModelService for InferenceClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, InferenceError> {
        self.chat_completion(request).await
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

// ─── Response Parsing ────────────────────────────────────────────────────────

/// Parse a complete (non-streaming) chat completion body.
pub fn parse_chat_completion(body: &str) -> Result<ModelReply, InferenceError> {
    #[derive(Deserialize)]
    struct CompletionResponse {
        choices: Vec<CompletionChoice>,
    }

    #[derive(Deserialize)]
    struct CompletionChoice {
        message: CompletionMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct CompletionMessage {
        content: Option<String>,
        tool_calls: Option<Vec<CompletionToolCall>>,
    }

    #[derive(Deserialize)]
    struct CompletionToolCall {
        id: Option<String>,
        function: CompletionFunction,
    }

    #[derive(Deserialize)]
    struct CompletionFunction {
        name: String,
        /// JSON-encoded string per the wire format; some servers send an object.
        arguments: serde_json::Value,
    }

    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseParseError {
            reason: format!("failed to parse chat completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseParseError {
            reason: "empty choices array".into(),
        })?;

    let text = choice.message.content.filter(|c| !c.trim().is_empty());

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let id = tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));
            let (arguments, argument_error) = normalize_arguments(&tc.function.name, tc.function.arguments);
            ToolCall {
                id,
                name: tc.function.name,
                arguments,
                argument_error,
            }
        })
        .collect();

    Ok(ModelReply {
        text,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

/// Turn wire-format arguments into a JSON object.
///
/// String arguments are parsed and repaired if needed. Unusable arguments
/// become an empty object plus the reason.
fn normalize_arguments(tool: &str, raw: Value) -> (Value, Option<String>) {
    let parsed = match raw {
        Value::Null => return (json!({}), None),
        Value::String(text) if text.trim().is_empty() => return (json!({}), None),
        Value::String(text) => match repair_tool_arguments(&text) {
            Some(value) => value,
            None => {
                tracing::warn!(tool, raw = %text, "unparseable tool arguments");
                return (json!({}), Some(format!("arguments are not valid JSON: {text}")));
            }
        },
        other => other,
    };

    if parsed.is_object() {
        (parsed, None)
    } else {
        tracing::warn!(tool, "tool arguments are not a JSON object");
        (json!({}), Some(format!("arguments must be a JSON object, got {parsed}")))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}/v1")
    }

    fn client_for(base_url: String) -> InferenceClient {
        InferenceClient::from_config(ModelConfig {
            base_url,
            request_timeout_secs: 5,
            ..ModelConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_text_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"All done."},"finish_reason":"stop"}]}"#;
        let reply = parse_chat_completion(body).unwrap();
        assert_eq!(reply.text.as_deref(), Some("All done."));
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"playwright.browser_navigate","arguments":"{\"url\":\"https://example.com\"}"}},
            {"type":"function","function":{"name":"playwright.browser_snapshot","arguments":""}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let reply = parse_chat_completion(body).unwrap();
        assert!(reply.text.is_none());
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].id, "call_1");
        assert_eq!(reply.tool_calls[0].arguments["url"], "https://example.com");
        assert!(reply.tool_calls[1].id.starts_with("call_"));
        assert_eq!(reply.tool_calls[1].arguments, serde_json::json!({}));
    }

    #[test]
    fn test_parse_rejects_bad_bodies() {
        assert!(parse_chat_completion("not json").is_err());
        assert!(parse_chat_completion(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_parse_keeps_malformed_calls_beside_good_ones() {
        let body = r##"{"choices":[{"message":{"tool_calls":[
            {"id":"ok","function":{"name":"p.browser_navigate","arguments":"{\"url\":\"https://a.test\"}"}},
            {"id":"fixed","function":{"name":"p.browser_click","arguments":"{\"selector\":\"#go\""}},
            {"id":"bad","function":{"name":"p.browser_type","arguments":"{oops"}},
            {"id":"list","function":{"name":"p.browser_type","arguments":"[1,2]"}}
        ]}}]}"##;
        let reply = parse_chat_completion(body).unwrap();
        assert_eq!(reply.tool_calls.len(), 4);

        assert!(reply.tool_calls[0].argument_error.is_none());
        assert_eq!(reply.tool_calls[1].arguments["selector"], "#go");
        assert!(reply.tool_calls[1].argument_error.is_none());

        assert_eq!(reply.tool_calls[2].arguments, serde_json::json!({}));
        assert!(reply.tool_calls[2].argument_error.as_deref().unwrap().contains("{oops"));
        assert!(reply.tool_calls[3].argument_error.is_some());
    }

    #[tokio::test]
    async fn test_chat_completion_round_trip() {
        let base = one_shot_server(
            "200 OK",
            r#"{"choices":[{"message":{"content":"hello"},"finish_reason":"stop"}]}"#,
        )
        .await;
        let client = client_for(base);
        let reply = client
            .complete(ModelRequest {
                system: "be brief".into(),
                messages: vec![ChatMessage::user("hi")],
                tools: vec![],
            })
            .await
            .unwrap();
        assert_eq!(reply.text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_overloaded_status_is_distinguished() {
        let base = one_shot_server(
            "529 Site Overloaded",
            r#"{"type":"error","error":{"type":"overloaded_error"}}"#,
        )
        .await;
        let err = client_for(base)
            .chat_completion(ModelRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_overloaded());
    }
}
