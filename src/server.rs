//! HTTP surfaces: the specialist A2A app and the host's OpenAI-compatible app.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::orchestrator::RoutingAgent;
use crate::protocol::{
    error_codes, methods, JsonRpcRequest, JsonRpcResponse, MessageSendParams, TaskIdParams,
    AGENT_CARD_PATH, AGENT_CARD_PATH_V2,
};
use crate::specialist::SpecialistAgent;

/// Model id the host advertises on `/v1/models`.
pub const HOST_MODEL_ID: &str = "news-finance-router";
const SESSION_HEADER: &str = "x-session-id";
const DEFAULT_SESSION: &str = "default";

/// Bind `host:port` and serve `app` until the process exits.
pub async fn serve(app: Router, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

// =============================================================================
// Specialist A2A app
// =============================================================================

/// Agent card plus JSON-RPC endpoint for one specialist.
pub fn specialist_app(agent: Arc<SpecialistAgent>) -> Router {
    Router::new()
        .route(AGENT_CARD_PATH, get(agent_card))
        .route(AGENT_CARD_PATH_V2, get(agent_card))
        .route("/", post(json_rpc))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

async fn agent_card(State(agent): State<Arc<SpecialistAgent>>) -> Json<Value> {
    Json(json!(agent.card()))
}

async fn json_rpc(State(agent): State<Arc<SpecialistAgent>>, body: String) -> Json<JsonRpcResponse> {
    Json(handle_message(&agent, &body).await)
}

/// Dispatch one JSON-RPC request body.
async fn handle_message(agent: &SpecialistAgent, body: &str) -> JsonRpcResponse {
    let raw: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to parse request: {}", e);
            return JsonRpcResponse::error(None, error_codes::PARSE_ERROR, e.to_string());
        }
    };
    let raw_id = raw.get("id").cloned();
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(req) => req,
        Err(e) => {
            return JsonRpcResponse::error(raw_id, error_codes::INVALID_REQUEST, e.to_string());
        }
    };
    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::error(
            request.id,
            error_codes::INVALID_REQUEST,
            format!("unsupported jsonrpc version: {}", request.jsonrpc),
        );
    }
    debug!("A2A request: {}", request.method);

    let id = request.id.clone();
    let result = match request.method.as_str() {
        methods::MESSAGE_SEND => match params::<MessageSendParams>(&request) {
            Ok(p) => agent.on_message_send(p).await,
            Err(e) => Err(e),
        },
        methods::TASKS_GET => match params::<TaskIdParams>(&request) {
            Ok(p) => agent.on_get_task(&p.id).await,
            Err(e) => Err(e),
        },
        methods::TASKS_CANCEL => match params::<TaskIdParams>(&request) {
            Ok(p) => agent.on_cancel_task(&p.id).await,
            Err(e) => Err(e),
        },
        other => {
            return JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            )
        }
    };

    match result.and_then(|task| Ok(serde_json::to_value(task)?)) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            let code = match &e {
                Error::InvalidParams(_) => error_codes::INVALID_PARAMS,
                Error::TaskNotFound(_) => error_codes::TASK_NOT_FOUND,
                Error::TaskNotCancelable(_) => error_codes::TASK_NOT_CANCELABLE,
                _ => error_codes::INTERNAL_ERROR,
            };
            JsonRpcResponse::error(id, code, e.to_string())
        }
    }
}

fn params<T: for<'de> Deserialize<'de>>(request: &JsonRpcRequest) -> Result<T> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| Error::InvalidParams(format!("{}: {e}", request.method)))
}

// =============================================================================
// Host app
// =============================================================================

/// OpenAI-compatible chat endpoint in front of the routing agent.
pub fn host_app(agent: Arc<RoutingAgent>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/agents", get(list_agents))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    content: Value,
}

impl IncomingMessage {
    /// Plain string content, or the text parts of array content.
    fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// OpenAI-style error body.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "message": self.message,
                "type": "invalid_request_error",
            }
        });
        (self.status, Json(body)).into_response()
    }
}

async fn chat_completions(
    State(agent): State<Arc<RoutingAgent>>,
    headers: HeaderMap,
    body: String,
) -> std::result::Result<Json<Value>, ApiError> {
    let request: ChatCompletionRequest =
        serde_json::from_str(&body).map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?;
    if request.stream {
        return Err(ApiError::bad_request("streaming is not supported"));
    }

    let prompt = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(IncomingMessage::text)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("no user message"))?;

    let session_id = request
        .user
        .filter(|u| !u.trim().is_empty())
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());

    let chunks = agent.handle_user_message(&prompt, &session_id).await;
    let content = chunks.join("\n\n");

    Ok(Json(json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": request.model.unwrap_or_else(|| HOST_MODEL_ID.to_string()),
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    })))
}

async fn list_models() -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{"id": HOST_MODEL_ID, "object": "model", "owned_by": env!("CARGO_PKG_NAME")}],
    }))
}

async fn list_agents(State(agent): State<Arc<RoutingAgent>>) -> Json<Value> {
    Json(json!({
        "agents": agent.list_remote_agents().await,
        "stats": agent.stats().await,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
