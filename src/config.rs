//! Environment-driven settings.
//!
//! - `MCP_ENABLED`, `MCP_TARGETS`, `MCP_CONNECT_TIMEOUT_SEC`,
//!   `MCP_INVOCATION_TIMEOUT_SEC`, `MCP_MAX_TOOL_CALL_DEPTH`: tool servers.
//! - `LLM_BASE_URL`, `LLM_API_KEY`, `LLM_MODEL`, `LLAMA_MODEL_PATH`,
//!   `LLM_TEMPERATURE`, `LLM_TIMEOUT_SEC`: the llama.cpp model server.
//! - `OPENSEARCH_URL`, `OPENSEARCH_INDEX`, `OPENSEARCH_USERNAME`,
//!   `OPENSEARCH_PASSWORD`, `RAG_TOP_K`, `EMBEDDING_DIM`: retrieval.
//! - `NEWS_AGENT_URL`, `FIN_AGENT_URL`: specialists the host discovers.
//! - `APP_URL`: URL a specialist advertises on its agent card.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

const DEFAULT_LLM_BASE_URL: &str = "http://localhost:8080/v1";
const DEFAULT_LLM_MODEL: &str = "local-model";
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";
const DEFAULT_OPENSEARCH_INDEX: &str = "news";
const DEFAULT_NEWS_AGENT_URL: &str = "http://localhost:10001";
const DEFAULT_FIN_AGENT_URL: &str = "http://localhost:10002";

/// All settings, read once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mcp: McpSettings,
    pub llm: LlmSettings,
    pub opensearch: OpenSearchSettings,
    pub host: HostSettings,
    /// Overrides the URL advertised on a specialist's agent card.
    pub app_url: Option<String>,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        Ok(Self {
            mcp: McpSettings::load(&env)?,
            llm: LlmSettings::load(&env)?,
            opensearch: OpenSearchSettings::load(&env)?,
            host: HostSettings::load(&env),
            app_url: env.string("APP_URL"),
        })
    }
}

/// Tool server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct McpSettings {
    pub enabled: bool,
    pub targets: Vec<McpTarget>,
    pub connect_timeout: Duration,
    pub invocation_timeout: Duration,
    pub max_tool_call_depth: usize,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            targets: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            invocation_timeout: Duration::from_secs(30),
            max_tool_call_depth: 4,
        }
    }
}

impl McpSettings {
    fn load(env: &Env<'_>) -> Result<Self> {
        let defaults = Self::default();
        let targets = match env.string("MCP_TARGETS") {
            Some(raw) => parse_targets(&raw)?,
            None => Vec::new(),
        };
        Ok(Self {
            enabled: env.flag("MCP_ENABLED"),
            targets,
            connect_timeout: env
                .parse::<u64>("MCP_CONNECT_TIMEOUT_SEC")?
                .map_or(defaults.connect_timeout, Duration::from_secs),
            invocation_timeout: env
                .parse::<u64>("MCP_INVOCATION_TIMEOUT_SEC")?
                .map_or(defaults.invocation_timeout, Duration::from_secs),
            max_tool_call_depth: env
                .parse("MCP_MAX_TOOL_CALL_DEPTH")?
                .unwrap_or(defaults.max_tool_call_depth),
        })
    }
}

/// A named MCP server endpoint (Streamable HTTP).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpTarget {
    pub name: String,
    pub url: String,
}

impl FromStr for McpTarget {
    type Err = Error;

    /// Accepts `name=url` or a bare `url` (named after its host).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, url) = match s.split_once('=') {
            Some((name, url)) if !name.contains("://") => (name.trim().to_string(), url.trim()),
            _ => (host_of(s).unwrap_or_default(), s),
        };
        if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("MCP_TARGETS: invalid target url: {s}")));
        }
        if name.is_empty() {
            return Err(Error::Config(format!("MCP_TARGETS: cannot name target: {s}")));
        }
        Ok(Self {
            name,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

fn parse_targets(raw: &str) -> Result<Vec<McpTarget>> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(McpTarget::from_str)
        .collect()
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split('/').next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = match host_port.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next()?,
        None => host_port.split(':').next()?,
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Model server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub model_path: Option<PathBuf>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.into(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.into(),
            model_path: None,
            temperature: 0.2,
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmSettings {
    fn load(env: &Env<'_>) -> Result<Self> {
        let defaults = Self::default();
        let model_path = env.string("LLAMA_MODEL_PATH").map(PathBuf::from);
        let model = model_path
            .as_deref()
            .and_then(model_id_from_path)
            .or_else(|| env.string("LLM_MODEL"))
            .unwrap_or(defaults.model);

        Ok(Self {
            base_url: env
                .string("LLM_BASE_URL")
                .unwrap_or(defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: env.string("LLM_API_KEY"),
            model,
            model_path,
            temperature: env.parse("LLM_TEMPERATURE")?.unwrap_or(defaults.temperature),
            timeout: env
                .parse::<u64>("LLM_TIMEOUT_SEC")?
                .map_or(defaults.timeout, Duration::from_secs),
        })
    }

    /// Warn when the configured model file is missing; loading it is the model server's job.
    pub fn check_model_path(&self) {
        if let Some(path) = &self.model_path {
            if !path.exists() {
                warn!("LLAMA_MODEL_PATH does not exist: {}", path.display());
            }
        }
    }
}

fn model_id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// OpenSearch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSearchSettings {
    pub url: String,
    pub index: String,
    pub basic_auth: Option<(String, String)>,
    pub top_k: usize,
    pub embedding_dim: usize,
}

impl Default for OpenSearchSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_OPENSEARCH_URL.into(),
            index: DEFAULT_OPENSEARCH_INDEX.into(),
            basic_auth: None,
            top_k: 5,
            embedding_dim: 384,
        }
    }
}

impl OpenSearchSettings {
    fn load(env: &Env<'_>) -> Result<Self> {
        let defaults = Self::default();
        let basic_auth = match (env.string("OPENSEARCH_USERNAME"), env.string("OPENSEARCH_PASSWORD")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        };
        Ok(Self {
            url: env
                .string("OPENSEARCH_URL")
                .unwrap_or(defaults.url)
                .trim_end_matches('/')
                .to_string(),
            index: env.string("OPENSEARCH_INDEX").unwrap_or(defaults.index),
            basic_auth,
            top_k: env.parse("RAG_TOP_K")?.unwrap_or(defaults.top_k),
            embedding_dim: env.parse("EMBEDDING_DIM")?.unwrap_or(defaults.embedding_dim),
        })
    }
}

/// Addresses of the specialists the host agent discovers.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSettings {
    pub news_agent_url: String,
    pub fin_agent_url: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            news_agent_url: DEFAULT_NEWS_AGENT_URL.into(),
            fin_agent_url: DEFAULT_FIN_AGENT_URL.into(),
        }
    }
}

impl HostSettings {
    fn load(env: &Env<'_>) -> Self {
        let defaults = Self::default();
        Self {
            news_agent_url: env.string("NEWS_AGENT_URL").unwrap_or(defaults.news_agent_url),
            fin_agent_url: env.string("FIN_AGENT_URL").unwrap_or(defaults.fin_agent_url),
        }
    }

    /// Specialist addresses in discovery order.
    pub fn remote_agent_addresses(&self) -> Vec<String> {
        vec![self.news_agent_url.clone(), self.fin_agent_url.clone()]
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    /// Non-empty, trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.string(key).is_some_and(|v| {
            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| Error::Config(format!("{key}: invalid value {v:?}: {e}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_bare_ipv6_target_named_after_host() {
        let target: McpTarget = "http://[::1]:9000/mcp".parse().unwrap();
        assert_eq!(target.name, "::1");
        assert_eq!(host_of("http://user@[fe80::2]/mcp").as_deref(), Some("fe80::2"));
        assert_eq!(host_of("http://[]:9000/mcp"), None);
    }

    #[test]
    fn test_dotenv_file_feeds_settings() {
        let file = "# local overrides\nMCP_ENABLED=yes\nMCP_TARGETS=\"quotes=http://localhost:9001/mcp\"\nRAG_TOP_K=3\n";
        let vars: HashMap<String, String> = dotenvy::from_read_iter(file.as_bytes())
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        let s = Settings::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert!(s.mcp.enabled);
        assert_eq!(s.mcp.targets[0].name, "quotes");
        assert_eq!(s.opensearch.top_k, 3);
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert!(!s.mcp.enabled);
        assert!(s.mcp.targets.is_empty());
        assert_eq!(s.mcp.connect_timeout, Duration::from_secs(10));
        assert_eq!(s.mcp.invocation_timeout, Duration::from_secs(30));
        assert_eq!(s.mcp.max_tool_call_depth, 4);
        assert_eq!(s.llm.model, "local-model");
        assert_eq!(s.host.news_agent_url, "http://localhost:10001");
        assert_eq!(s.host.fin_agent_url, "http://localhost:10002");
        assert!(s.app_url.is_none());
    }

    #[test]
    fn test_mcp_variables() {
        let s = settings(&[
            ("MCP_ENABLED", "True"),
            ("MCP_TARGETS", "quotes=http://localhost:9001/mcp/, http://tools.internal:9002/mcp"),
            ("MCP_CONNECT_TIMEOUT_SEC", "3"),
            ("MCP_INVOCATION_TIMEOUT_SEC", "15"),
            ("MCP_MAX_TOOL_CALL_DEPTH", "2"),
        ])
        .unwrap();

        assert!(s.mcp.enabled);
        assert_eq!(
            s.mcp.targets,
            vec![
                McpTarget { name: "quotes".into(), url: "http://localhost:9001/mcp".into() },
                McpTarget { name: "tools.internal".into(), url: "http://tools.internal:9002/mcp".into() },
            ]
        );
        assert_eq!(s.mcp.connect_timeout, Duration::from_secs(3));
        assert_eq!(s.mcp.invocation_timeout, Duration::from_secs(15));
        assert_eq!(s.mcp.max_tool_call_depth, 2);
    }

    #[test]
    fn test_flag_values() {
        for off in ["0", "false", "no", "off", ""] {
            assert!(!settings(&[("MCP_ENABLED", off)]).unwrap().mcp.enabled, "{off}");
        }
        assert!(settings(&[("MCP_ENABLED", "YES")]).unwrap().mcp.enabled);
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = settings(&[("MCP_INVOCATION_TIMEOUT_SEC", "soon")]).unwrap_err();
        assert!(err.to_string().contains("MCP_INVOCATION_TIMEOUT_SEC"));
    }

    #[test]
    fn test_invalid_target() {
        let err = settings(&[("MCP_TARGETS", "quotes=localhost:9001")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_model_id_from_llama_model_path() {
        let s = settings(&[
            ("LLAMA_MODEL_PATH", "/models/qwen2.5-7b-instruct-q4_k_m.gguf"),
            ("LLM_MODEL", "ignored"),
        ])
        .unwrap();
        assert_eq!(s.llm.model, "qwen2.5-7b-instruct-q4_k_m");

        let s = settings(&[("LLM_MODEL", "granite")]).unwrap();
        assert_eq!(s.llm.model, "granite");
    }

    #[test]
    fn test_opensearch_auth_requires_both() {
        let s = settings(&[("OPENSEARCH_USERNAME", "admin")]).unwrap();
        assert!(s.opensearch.basic_auth.is_none());

        let s = settings(&[
            ("OPENSEARCH_USERNAME", "admin"),
            ("OPENSEARCH_PASSWORD", "secret"),
            ("OPENSEARCH_URL", "https://search:9200/"),
        ])
        .unwrap();
        assert_eq!(s.opensearch.basic_auth, Some(("admin".into(), "secret".into())));
        assert_eq!(s.opensearch.url, "https://search:9200");
    }
}
