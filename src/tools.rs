//! Tools offered to the model and the bounded tool-call loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::McpSettings;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel, FunctionTool};
use crate::mcp::{McpClient, ToolDefinition};

/// Tool trait for anything the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> FunctionTool;

    /// Execute the tool with the given arguments; returns text for the model.
    async fn execute(&self, arguments: Value) -> Result<String>;
}

/// A tool hosted on an MCP server.
pub struct McpTool {
    client: Arc<McpClient>,
    definition: ToolDefinition,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, definition: ToolDefinition) -> Self {
        Self { client, definition }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn definition(&self) -> FunctionTool {
        FunctionTool::new(
            self.definition.name.clone(),
            self.definition.description.clone().unwrap_or_default(),
            self.definition.input_schema.clone(),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let result = self.client.call_tool(&self.definition.name, arguments).await?;
        Ok(result.text())
    }
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so definitions are stable across calls.
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to every configured MCP target and register its tools.
    ///
    /// Unreachable targets are logged and skipped. Returns an empty registry
    /// when MCP is disabled.
    pub async fn discover(settings: &McpSettings) -> Self {
        let mut registry = Self::new();
        if !settings.enabled {
            return registry;
        }

        for target in &settings.targets {
            let name = target.name.clone();
            let client = match McpClient::connect(
                target.clone(),
                settings.connect_timeout,
                settings.invocation_timeout,
            )
            .await
            {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!("Skipping MCP target {}: {}", name, e);
                    continue;
                }
            };

            match client.list_tools().await {
                Ok(definitions) => {
                    info!("MCP target {} offers {} tools", name, definitions.len());
                    for definition in definitions {
                        registry.register(Arc::new(McpTool::new(client.clone(), definition)));
                    }
                }
                Err(e) => warn!("Listing tools on {} failed: {}", name, e),
            }
        }
        registry
    }

    /// Register a tool. The first tool registered under a name wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.definition().function.name;
        if self.tools.contains_key(&name) {
            warn!("Duplicate tool name {}, keeping the first", name);
            return false;
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Get all tool definitions.
    pub fn definitions(&self) -> Vec<FunctionTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    /// Invoke a tool by name.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::InvalidParams(format!("unknown tool: {}", name)))?;

        tool.execute(arguments).await
    }
}

/// Chat with tools until the model answers in text.
///
/// Tools are offered for the first `max_depth` rounds. Every requested call
/// is answered with a `tool` message (failures as error text). The round
/// after that is made without tools; a model that still asks for tools
/// yields [`Error::ToolDepthExceeded`].
pub async fn run_tool_loop(
    model: &dyn ChatModel,
    registry: &ToolRegistry,
    mut messages: Vec<ChatMessage>,
    max_depth: usize,
) -> Result<String> {
    let definitions = registry.definitions();

    for depth in 0..=max_depth {
        let offered: &[FunctionTool] = if depth < max_depth { &definitions } else { &[] };
        let turn = model.chat(&messages, offered).await?;
        if turn.tool_calls.is_empty() {
            return Ok(turn.content.unwrap_or_default());
        }
        if depth == max_depth {
            break;
        }

        let calls = turn.tool_calls.clone();
        messages.push(turn.into_message());
        for call in calls {
            let name = &call.function.name;
            let output = match call.function.parsed_arguments() {
                Ok(arguments) => registry.invoke(name, arguments).await,
                Err(e) => Err(e),
            };
            let text = output.unwrap_or_else(|e| {
                warn!("Tool {} failed: {}", name, e);
                format!("Tool error: {e}")
            });
            messages.push(ChatMessage::tool(call.id.clone(), text));
        }
    }

    Err(Error::ToolDepthExceeded(max_depth))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process tools for tests.

    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Returns a fixed reply and records received arguments.
    pub struct EchoTool {
        pub name: String,
        pub reply: String,
        pub calls: Mutex<Vec<Value>>,
    }

    impl EchoTool {
        pub fn new(name: &str, reply: &str) -> Self {
            Self {
                name: name.into(),
                reply: reply.into(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> FunctionTool {
            FunctionTool::new(
                self.name.clone(),
                "test tool",
                json!({"type": "object", "properties": {"symbol": {"type": "string"}}}),
            )
        }

        async fn execute(&self, arguments: Value) -> Result<String> {
            self.calls.lock().unwrap().push(arguments);
            Ok(self.reply.clone())
        }
    }
}
