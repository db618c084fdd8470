//! News/Financial multi-agent routing
//!
//! This crate wires a host routing agent to two A2A specialists. It provides:
//!
//! - A keyword/ticker policy that picks the News or Financial specialist
//! - A2A agent card discovery and `message/send` delegation
//! - Specialists answering through a llama.cpp (OpenAI-compatible) server
//! - OpenSearch k-NN retrieval for grounded news answers
//! - MCP tools offered to the model with a bounded tool-call loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               Chat client (OpenAI-compatible API)               │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │ POST /v1/chat/completions
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         host agent                              │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐    │
//! │  │ Policy     │ │ Decision   │ │ Specialist │ │ Session    │    │
//! │  │ Manager    │ │ Flow       │ │ Router     │ │ History    │    │
//! │  └────────────┘ └────────────┘ └────────────┘ └────────────┘    │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │ A2A (JSON-RPC over HTTP)
//!                 ┌───────────┴───────────┐
//!                 ▼                       ▼
//!         ┌───────────────┐       ┌───────────────┐
//!         │  News Agent   │       │  Financial    │
//!         │  :10001       │       │  Agent :10002 │
//!         └───┬───────┬───┘       └───┬───────────┘
//!             │       │               │
//!             ▼       ▼               ▼
//!      OpenSearch   llama.cpp server + MCP tool servers
//! ```
//!
//! # Environment
//!
//! | Variable | Used by |
//! |----------|---------|
//! | `NEWS_AGENT_URL`, `FIN_AGENT_URL` | host discovery |
//! | `MCP_ENABLED`, `MCP_TARGETS`, `MCP_*_TIMEOUT_SEC`, `MCP_MAX_TOOL_CALL_DEPTH` | specialist tools |
//! | `LLM_BASE_URL`, `LLAMA_MODEL_PATH`, `LLM_MODEL` | specialist model |
//! | `OPENSEARCH_URL`, `OPENSEARCH_INDEX`, `RAG_TOP_K`, `EMBEDDING_DIM` | news retrieval, ingest |
//! | `APP_URL` | URL on a specialist's agent card |

pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod policy;
pub mod protocol;
pub mod retrieval;
pub mod router;
pub mod server;
pub mod specialist;
pub mod tools;
pub mod workflow;

pub use config::Settings;
pub use error::{Error, Result};
pub use orchestrator::{initialize_routing_agent, RoutingAgent};
pub use policy::{NewsFinancePolicyManager, PolicyClassification, Route};
pub use specialist::{SpecialistAgent, SpecialistExecutor, SpecialistProfile};
pub use tools::ToolRegistry;
pub use workflow::HostGraphState;
