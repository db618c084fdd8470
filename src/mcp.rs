//! MCP client over Streamable HTTP.
//!
//! Each request is a JSON-RPC POST to the target URL. Servers may answer
//! with `application/json` or a `text/event-stream` body; in the latter case
//! the first `data:` event carrying our request id is the response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::decode_result;
use crate::config::McpTarget;
use crate::error::{Error, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Tool definition returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolCallResult {
    /// Text contents joined by newline, falling back to structured content.
    pub fn text(&self) -> String {
        let text = self
            .content
            .iter()
            .filter_map(|c| match c {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        match &self.structured_content {
            Some(structured) if text.is_empty() => structured.to_string(),
            _ => text,
        }
    }
}

/// Content item in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

/// Session with one MCP server.
pub struct McpClient {
    target: McpTarget,
    client: reqwest::Client,
    session_id: Option<HeaderValue>,
    invocation_timeout: Duration,
    next_id: AtomicU64,
}

impl McpClient {
    /// Connect and complete the `initialize` handshake within `connect_timeout`.
    pub async fn connect(
        target: McpTarget,
        connect_timeout: Duration,
        invocation_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        let mut mcp = Self {
            target,
            client,
            session_id: None,
            invocation_timeout,
            next_id: AtomicU64::new(1),
        };

        let name = mcp.target.name.clone();
        tokio::time::timeout(connect_timeout, mcp.initialize())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "MCP server {name} did not initialize within {connect_timeout:?}"
                ))
            })??;
        Ok(mcp)
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let request = JsonRpcRequest::new(self.request_id(), "initialize", params);
        let response = self.send(&request).await?;
        if let Some(session) = response.headers().get(SESSION_HEADER) {
            self.session_id = Some(session.clone());
        }
        let result: Value = decode_result(Self::read_response(response, &request).await?)?;
        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unnamed");
        info!("Connected to MCP server {} ({})", self.target.name, server);

        let initialized = JsonRpcRequest::notification("notifications/initialized", json!({}));
        self.send(&initialized).await?;
        Ok(())
    }

    /// `tools/list`, bounded by the invocation timeout.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let result: ListToolsResult = self.call("tools/list", json!({})).await?;
        Ok(result.tools)
    }

    /// `tools/call`, bounded by the invocation timeout. `isError` results become errors.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let result: ToolCallResult = self
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        if result.is_error {
            return Err(Error::Mcp(format!("{name}: {}", result.text())));
        }
        Ok(result)
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T> {
        let request = JsonRpcRequest::new(self.request_id(), method, params);
        let exchange = async {
            let response = self.send(&request).await?;
            Self::read_response(response, &request).await
        };
        let body = tokio::time::timeout(self.invocation_timeout, exchange)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{method} on {} exceeded {:?}",
                    self.target.name, self.invocation_timeout
                ))
            })??;
        decode_result(body)
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<reqwest::Response> {
        debug!("MCP {} -> {}", request.method, self.target.name);
        let mut builder = self
            .client
            .post(&self.target.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(request);
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Mcp(format!(
                "{} returned HTTP {status} for {}",
                self.target.name, request.method
            )));
        }
        Ok(response)
    }

    async fn read_response(response: reqwest::Response, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = response.text().await?;

        if is_event_stream {
            parse_event_stream(&body, request.id.as_ref())
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }

    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Find the JSON-RPC response with `id` among SSE `data:` events.
fn parse_event_stream(body: &str, id: Option<&Value>) -> Result<JsonRpcResponse> {
    let mut data = String::new();
    let events = body.lines().chain(std::iter::once(""));
    for line in events {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            continue;
        }
        if line.trim().is_empty() && !data.is_empty() {
            let event = std::mem::take(&mut data);
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&event) {
                if response.id.as_ref() == id {
                    return Ok(response);
                }
            }
        }
    }
    Err(Error::Protocol("event stream ended without a response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_stream_picks_matching_id() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"tools\":[]}}\n\
                    \n";
        let response = parse_event_stream(body, Some(&json!(7))).unwrap();
        assert_eq!(response.result, Some(json!({"tools": []})));
    }

    #[test]
    fn test_parse_event_stream_without_trailing_blank_line() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}";
        assert!(parse_event_stream(body, Some(&json!(3))).is_ok());
        assert!(parse_event_stream(body, Some(&json!(4))).is_err());
    }

    #[test]
    fn test_tool_result_text() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "AAPL 189.12"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "audio", "data": "..."},
                {"type": "text", "text": "USD"}
            ]
        }))
        .unwrap();
        assert_eq!(result.text(), "AAPL 189.12\nUSD");
        assert!(!result.is_error);

        let structured: ToolCallResult = serde_json::from_value(json!({
            "content": [],
            "structuredContent": {"price": 1.5}
        }))
        .unwrap();
        assert_eq!(structured.text(), "{\"price\":1.5}");
    }

    async fn stub_server() -> String {
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::post;
        use axum::{Json, Router};

        async fn handle(headers: HeaderMap, Json(req): Json<Value>) -> Response {
            let id = req["id"].clone();
            let session = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
            match req["method"].as_str().unwrap_or_default() {
                "initialize" => (
                    [(SESSION_HEADER, "sess-1")],
                    Json(json!({"jsonrpc": "2.0", "id": id, "result": {"serverInfo": {"name": "quotes"}}})),
                )
                    .into_response(),
                "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
                _ if session != Some("sess-1") => StatusCode::BAD_REQUEST.into_response(),
                "tools/list" => Json(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                    {"name": "get_quote", "description": "Latest quote", "inputSchema": {"type": "object"}}
                ]}}))
                .into_response(),
                "tools/call" => {
                    let symbol = req["params"]["arguments"]["symbol"].as_str().unwrap_or_default();
                    let result = if symbol.is_empty() {
                        json!({"content": [{"type": "text", "text": "symbol required"}], "isError": true})
                    } else {
                        json!({"content": [{"type": "text", "text": format!("{symbol} 189.12")}]})
                    };
                    let event = json!({"jsonrpc": "2.0", "id": id, "result": result});
                    (
                        [("content-type", "text/event-stream")],
                        format!("event: message\ndata: {event}\n\n"),
                    )
                        .into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        let app = Router::new().route("/mcp", post(handle));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        url
    }

    #[tokio::test]
    async fn test_session_against_stub_server() {
        let target = McpTarget { name: "quotes".into(), url: stub_server().await };
        let client = McpClient::connect(target, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.name(), "quotes");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "get_quote");

        let result = client.call_tool("get_quote", json!({"symbol": "AAPL"})).await.unwrap();
        assert_eq!(result.text(), "AAPL 189.12");

        let err = client.call_tool("get_quote", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Mcp(msg) if msg.contains("symbol required")));
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let target = McpTarget { name: "none".into(), url: "http://127.0.0.1:1/mcp".into() };
        assert!(McpClient::connect(target, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .is_err());
    }

    #[test]
    fn test_tool_definition_defaults_schema() {
        let def: ToolDefinition = serde_json::from_value(json!({"name": "now"})).unwrap();
        assert_eq!(def.input_schema["type"], "object");
        assert!(def.description.is_none());
    }
}
