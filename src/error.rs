//! Error types for newsfin-a2a.

use thiserror::Error;

/// Result type for newsfin-a2a operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for newsfin-a2a.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected message from a peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error object returned by a remote agent or tool server.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    /// Timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Model server error.
    #[error("llm error: {0}")]
    Llm(String),

    /// Vector store error.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// MCP tool server error.
    #[error("mcp error: {0}")]
    Mcp(String),

    /// The model kept requesting tools past the configured depth.
    #[error("tool call depth exceeded after {0} rounds")]
    ToolDepthExceeded(usize),

    /// No connection registered under this agent name.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Task id not present in the task store.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Task already reached a terminal state.
    #[error("task cannot be canceled: {0}")]
    TaskNotCancelable(String),

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}
