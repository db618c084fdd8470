//! A2A client: agent card discovery and `message/send`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{
    methods, AgentCard, JsonRpcRequest, JsonRpcResponse, Message, MessageSendParams,
    SendMessageResult, AGENT_CARD_PATH,
};

/// Whole-request timeout for calls to remote agents.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);
/// Connect timeout for calls to remote agents.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by card discovery and remote connections.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()?)
}

/// Fetches agent cards from `{base_url}/.well-known/agent.json`.
#[derive(Clone)]
pub struct A2aCardResolver {
    client: reqwest::Client,
}

impl A2aCardResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch and decode the card published by the agent at `base_url`.
    pub async fn get_agent_card(&self, base_url: &str) -> Result<AgentCard> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH);
        debug!("Fetching agent card: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "agent card request to {url} failed: {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

/// Connection to one remote agent.
#[derive(Clone)]
pub struct RemoteAgentConnection {
    card: AgentCard,
    url: String,
    client: reqwest::Client,
}

impl RemoteAgentConnection {
    /// `agent_url` is used when the card does not advertise its own URL.
    pub fn new(client: reqwest::Client, card: AgentCard, agent_url: impl Into<String>) -> Self {
        let agent_url = agent_url.into();
        let url = if card.url.trim().is_empty() {
            agent_url
        } else {
            card.url.clone()
        };
        Self { card, url, client }
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Endpoint JSON-RPC requests are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a message; the agent answers with a task or a message.
    pub async fn send_message(&self, message: Message) -> Result<SendMessageResult> {
        let id = message.message_id.clone();
        let params = serde_json::to_value(MessageSendParams { message })?;
        self.call(JsonRpcRequest::new(id, methods::MESSAGE_SEND, params))
            .await
    }

    async fn call<T: DeserializeOwned>(&self, request: JsonRpcRequest) -> Result<T> {
        debug!("A2A {} -> {} ({})", request.method, self.card.name, self.url);

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "{} returned HTTP {status}",
                self.card.name
            )));
        }

        let body: JsonRpcResponse = response.json().await?;
        decode_result(body)
    }
}

/// Unwrap a JSON-RPC response into its typed result.
pub(crate) fn decode_result<T: DeserializeOwned>(body: JsonRpcResponse) -> Result<T> {
    if let Some(err) = body.error {
        return Err(Error::Remote {
            code: err.code,
            message: err.message,
        });
    }
    let result = body
        .result
        .ok_or_else(|| Error::Protocol("response has neither result nor error".into()))?;
    Ok(serde_json::from_value::<T>(result)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::{AgentCapabilities, Role};

    fn card(url: &str) -> AgentCard {
        AgentCard {
            name: "News Agent".into(),
            description: "Helps with news search".into(),
            url: url.into(),
            version: "1.0.0".into(),
            default_input_modes: vec!["text".into()],
            default_output_modes: vec!["text".into()],
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
        }
    }

    #[test]
    fn test_connection_prefers_card_url() {
        let client = reqwest::Client::new();
        let conn = RemoteAgentConnection::new(client.clone(), card("http://news:10001/"), "http://localhost:10001");
        assert_eq!(conn.url(), "http://news:10001/");

        let conn = RemoteAgentConnection::new(client, card(" "), "http://localhost:10001");
        assert_eq!(conn.url(), "http://localhost:10001");
    }

    #[test]
    fn test_decode_error_maps_to_remote() {
        let body = JsonRpcResponse::error(Some(json!(1)), -32001, "task not found");
        let err = decode_result::<serde_json::Value>(body).unwrap_err();
        assert!(matches!(err, Error::Remote { code: -32001, .. }));
    }

    #[test]
    fn test_decode_missing_result_is_protocol_error() {
        let body = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            result: None,
            error: None,
        };
        assert!(matches!(decode_result::<serde_json::Value>(body), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_typed_message_result() {
        let msg = Message::text(Role::Agent, "ok");
        let body = JsonRpcResponse::success(Some(json!("1")), serde_json::to_value(&msg).unwrap());
        let result: SendMessageResult = decode_result(body).unwrap();
        assert_eq!(result, SendMessageResult::Message(msg));
    }
}
