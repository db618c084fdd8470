//! OpenAI-compatible client for the llama.cpp model server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::LlmSettings;
use crate::error::{Error, Result};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Chat message in OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Result of a tool call, answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".into()
}

/// Name and JSON-encoded arguments of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    /// Decoded arguments; an empty string means no arguments.
    pub fn parsed_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
            .map_err(|e| Error::InvalidParams(format!("arguments for {}: {e}", self.name)))
    }
}

/// Function tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionSpec,
}

/// Function signature offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

impl FunctionTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".into(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// The assistant's reply: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: ChatRole::Assistant,
            content: self.content,
            tool_calls: self.tool_calls,
            tool_call_id: None,
        }
    }
}

/// Chat and embedding model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One chat completion. `tools` empty means plain chat.
    async fn chat(&self, messages: &[ChatMessage], tools: &[FunctionTool]) -> Result<AssistantTurn>;

    /// Embed each input text.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [FunctionTool],
    temperature: f32,
    stream: bool,
}

fn no_tools(tools: &&[FunctionTool]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Client for `{base_url}/chat/completions` and `{base_url}/embeddings`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    settings: LlmSettings,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { settings, client })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.settings.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Llm(format!("{url} returned {status}: {text}")));
        }
        serde_json::from_str(&text).map_err(|e| Error::Llm(format!("invalid response from {url}: {e}")))
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn chat(&self, messages: &[ChatMessage], tools: &[FunctionTool]) -> Result<AssistantTurn> {
        debug!(
            "Chat completion: model={} messages={} tools={}",
            self.settings.model,
            messages.len(),
            tools.len()
        );
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages,
            tools,
            temperature: self.settings.temperature,
            stream: false,
        };
        let response: ChatCompletionResponse = self.post("/chat/completions", &body).await?;
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::Llm("completion has no choices".into()))?;

        Ok(AssistantTurn {
            content: message.content,
            tool_calls: message.tool_calls,
        })
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.settings.model,
            input: inputs,
        };
        let mut response: EmbeddingResponse = self.post("/embeddings", &body).await?;
        if response.data.len() != inputs.len() {
            return Err(Error::Llm(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_tool_message_wire_format() {
        let value = serde_json::to_value(ChatMessage::tool("call_1", "42")).unwrap();
        assert_eq!(value, json!({"role": "tool", "content": "42", "tool_call_id": "call_1"}));
    }

    #[test]
    fn test_assistant_tool_calls_decode() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_9",
                "type": "function",
                "function": {"name": "get_quote", "arguments": "{\"symbol\":\"AAPL\"}"}
            }]
        }))
        .unwrap();
        assert!(msg.content.is_none());
        let call = &msg.tool_calls[0];
        assert_eq!(call.function.parsed_arguments().unwrap(), json!({"symbol": "AAPL"}));
    }

    #[test]
    fn test_empty_arguments_are_empty_object() {
        let call = FunctionCall { name: "now".into(), arguments: " ".into() };
        assert_eq!(call.parsed_arguments().unwrap(), json!({}));

        let call = FunctionCall { name: "now".into(), arguments: "{oops".into() };
        assert!(matches!(call.parsed_arguments(), Err(Error::InvalidParams(_))));
    }

    async fn stub_server() -> String {
        use axum::http::StatusCode;
        use axum::routing::post;
        use axum::{Json, Router};

        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|Json(req): Json<Value>| async move {
                    if req["model"] == "broken" {
                        return Err((StatusCode::SERVICE_UNAVAILABLE, "loading model"));
                    }
                    let content = format!("tools offered: {}", req["tools"].as_array().map_or(0, Vec::len));
                    Ok(Json(json!({
                        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
                    })))
                }),
            )
            .route(
                "/v1/embeddings",
                post(|| async {
                    Json(json!({"data": [
                        {"index": 1, "embedding": [0.0, 1.0]},
                        {"index": 0, "embedding": [1.0, 0.0]}
                    ]}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        url
    }

    fn client(base_url: String, model: &str) -> OpenAiCompatClient {
        OpenAiCompatClient::new(LlmSettings {
            base_url,
            model: model.into(),
            ..LlmSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_chat_and_embeddings_against_stub() {
        let base = stub_server().await;
        let llm = client(base.clone(), "local-model");

        let tool = FunctionTool::new("get_quote", "quote", json!({"type": "object"}));
        let turn = llm.chat(&[ChatMessage::user("hi")], &[tool]).await.unwrap();
        assert_eq!(turn.content.as_deref(), Some("tools offered: 1"));
        assert!(turn.tool_calls.is_empty());

        let vectors = llm.embed(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let err = llm.embed(&["only one".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));

        let err = client(base, "broken").chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, Error::Llm(msg) if msg.contains("503")));
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let messages = [ChatMessage::user("hi")];
        let body = ChatCompletionRequest {
            model: "m",
            messages: &messages,
            tools: &[],
            temperature: 0.2,
            stream: false,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
