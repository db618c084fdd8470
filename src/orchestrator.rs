//! Host routing agent: runs the decision flow and talks to specialists.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::client::{http_client, A2aCardResolver, RemoteAgentConnection};
use crate::config::HostSettings;
use crate::error::{Error, Result};
use crate::llm::ChatMessage;
use crate::policy::NewsFinancePolicyManager;
use crate::protocol::{Message, Part, Role, SendMessageResult, Task, TaskState};
use crate::router::{AgentStats, RemoteAgentInfo, SpecialistRouter};
use crate::workflow::{Availability, HostGraphState, PolicyDecision};

const FALLBACK_ANSWER: &str = "I don't know.";

/// Routes user requests to the News or Financial specialist.
pub struct RoutingAgent {
    /// Discovered specialists.
    router: Arc<RwLock<SpecialistRouter>>,
    policy: NewsFinancePolicyManager,
    /// Conversation history per session.
    sessions: Arc<RwLock<HashMap<String, Vec<ChatMessage>>>>,
    /// A2A context id per (session, agent).
    context_ids: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl RoutingAgent {
    /// Create with an already populated router.
    pub fn new(router: SpecialistRouter) -> Self {
        Self {
            router: Arc::new(RwLock::new(router)),
            policy: NewsFinancePolicyManager::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            context_ids: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve the agent card at each address. Unreachable agents are skipped.
    pub async fn create(addresses: &[String]) -> Result<Self> {
        let client = http_client()?;
        let resolver = A2aCardResolver::new(client.clone());
        let cards = join_all(addresses.iter().map(|a| resolver.get_agent_card(a))).await;

        let mut router = SpecialistRouter::new();
        for (address, card) in addresses.iter().zip(cards) {
            match card {
                Ok(card) => {
                    info!("Discovered agent {} at {}", card.name, address);
                    router.register(RemoteAgentConnection::new(client.clone(), card, address.clone()));
                }
                Err(e) => warn!("Failed to get agent card from {}: {}", address, e),
            }
        }
        Ok(Self::new(router))
    }

    pub async fn list_remote_agents(&self) -> Vec<RemoteAgentInfo> {
        self.router.read().await.list_remote_agents()
    }

    pub async fn stats(&self) -> HashMap<String, AgentStats> {
        self.router.read().await.stats()
    }

    pub async fn session_history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Answer one user message; the reply is a list of chunks.
    pub async fn handle_user_message(&self, message: &str, session_id: &str) -> Vec<String> {
        self.record(session_id, [ChatMessage::user(message)]).await;

        let state = self.run(message, session_id).await;
        let mut responses = state.response_chunks;
        if responses.is_empty() {
            responses.push(FALLBACK_ANSWER.to_string());
        }

        self.record(session_id, responses.iter().map(ChatMessage::assistant))
            .await;
        responses
    }

    /// Run the decision flow to completion.
    pub async fn run(&self, message: &str, session_id: &str) -> HostGraphState {
        let mut state = HostGraphState::new(message, session_id);
        state.classify_request(&self.policy);

        let (news, finance) = {
            let router = self.router.read().await;
            (
                router.news_agent().map(String::from),
                router.finance_agent().map(String::from),
            )
        };
        let available = Availability {
            news: news.is_some(),
            finance: finance.is_some(),
        };

        match state.evaluate_policy(available) {
            PolicyDecision::FetchNews => {
                let output = match news {
                    Some(agent) => Some(self.fetch(&agent, &state.news_prompt(), session_id).await),
                    None => None,
                };
                state.apply_news_output(output);
            }
            PolicyDecision::FetchFinance => {
                let output = match finance {
                    Some(agent) => Some(self.fetch(&agent, &state.finance_prompt(), session_id).await),
                    None => None,
                };
                state.apply_finance_output(output);
            }
            PolicyDecision::Respond => {}
        }

        state.compose_response();
        state
    }

    async fn fetch(&self, agent_name: &str, task: &str, session_id: &str) -> String {
        let Some(task) = self.send_message(agent_name, task, session_id).await else {
            return String::new();
        };
        match task.status.state {
            TaskState::Failed | TaskState::Rejected | TaskState::Canceled => {
                let reason = task
                    .status
                    .message
                    .as_ref()
                    .map(Message::text_content)
                    .unwrap_or_default();
                error!("{} ended task {} as {:?}: {}", agent_name, task.id, task.status.state, reason);
                String::new()
            }
            _ => extract_task_output(&task),
        }
    }

    /// Send `task` to a specialist, continuing the session's context with it.
    ///
    /// Returns `None` when the agent is unknown, fails, or answers with
    /// something other than a task.
    pub async fn send_message(&self, agent_name: &str, task: &str, session_id: &str) -> Option<Task> {
        match self.delegate(agent_name, task, session_id).await {
            Ok(task) => Some(task),
            Err(e) => {
                error!("Delegation to {} failed: {}", agent_name, e);
                None
            }
        }
    }

    async fn delegate(&self, agent_name: &str, task: &str, session_id: &str) -> Result<Task> {
        let connection = self
            .router
            .read()
            .await
            .connection(agent_name)
            .cloned()
            .ok_or_else(|| Error::UnknownAgent(agent_name.to_string()))?;

        let key = (session_id.to_string(), agent_name.to_string());
        let context_id = self.context_ids.read().await.get(&key).cloned();
        let message = Message::text(Role::User, task).with_context_id(context_id);

        let start = Instant::now();
        let result = connection.send_message(message).await;
        let mut router = self.router.write().await;
        match result {
            Ok(SendMessageResult::Task(task)) => {
                router.record_success(agent_name, start.elapsed());
                drop(router);
                self.context_ids
                    .write()
                    .await
                    .insert(key, task.context_id.clone());
                Ok(task)
            }
            Ok(SendMessageResult::Message(_)) => {
                router.record_success(agent_name, start.elapsed());
                Err(Error::Protocol(format!("non-task response from {agent_name}")))
            }
            Err(e) => {
                router.record_failure(agent_name);
                Err(e)
            }
        }
    }

    async fn record(&self, session_id: &str, turns: impl IntoIterator<Item = ChatMessage>) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend(turns);
    }
}

/// Connect to the specialists at `NEWS_AGENT_URL` and `FIN_AGENT_URL`.
pub async fn initialize_routing_agent(settings: &HostSettings) -> Result<RoutingAgent> {
    RoutingAgent::create(&settings.remote_agent_addresses()).await
}

/// Text of a task's status message and artifacts, without repeats.
///
/// Status text is dropped when the artifacts already contain all of it.
/// Lines are trimmed and deduplicated (first occurrence wins), blank runs
/// collapse to one, and blocks are separated by a blank line.
pub fn extract_task_output(task: &Task) -> String {
    let mut status_texts = task
        .status
        .message
        .as_ref()
        .map(|m| parts_to_text(&m.parts))
        .unwrap_or_default();
    let artifact_texts: Vec<String> = task
        .artifacts
        .iter()
        .flat_map(|a| parts_to_text(&a.parts))
        .collect();

    let artifact_blob = artifact_texts.join("\n");
    if !artifact_texts.is_empty()
        && !status_texts.is_empty()
        && status_texts.iter().all(|s| artifact_blob.contains(s.trim()))
    {
        status_texts.clear();
    }

    let mut seen = HashSet::new();
    let mut lines: Vec<&str> = Vec::new();
    for block in status_texts.iter().chain(&artifact_texts) {
        for line in block.lines().map(str::trim) {
            if line.is_empty() {
                if lines.last().is_some_and(|l| !l.is_empty()) {
                    lines.push("");
                }
                continue;
            }
            if seen.insert(line) {
                lines.push(line);
            }
        }
        if lines.last().is_some_and(|l| !l.is_empty()) {
            lines.push("");
        }
    }
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines.join("\n")
}

fn parts_to_text(parts: &[Part]) -> Vec<String> {
    parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => text.clone(),
            Part::Data { data } => {
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
            }
            Part::File { file } => format!(
                "Received file content ({}).",
                file.mime_type.as_deref().unwrap_or("unknown mime type")
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::{Artifact, FileContent, TaskState, TaskStatus};
    use crate::server::specialist_app;
    use crate::specialist::testing::StaticExecutor;
    use crate::specialist::{SpecialistAgent, SpecialistProfile};

    fn task(status: Option<&str>, artifacts: Vec<Vec<Part>>) -> Task {
        let mut task = Task::new("ctx", TaskState::Completed);
        task.status = TaskStatus::new(
            TaskState::Completed,
            status.map(|s| Message::text(Role::Agent, s)),
        );
        task.artifacts = artifacts
            .into_iter()
            .enumerate()
            .map(|(n, parts)| Artifact {
                artifact_id: format!("a{n}"),
                name: None,
                parts,
            })
            .collect();
        task
    }

    #[test]
    fn test_status_subsumed_by_artifact_is_dropped() {
        let t = task(
            Some("  Apple beat estimates. "),
            vec![vec![Part::text("Apple beat estimates.\nRevenue up 5%.")]],
        );
        assert_eq!(extract_task_output(&t), "Apple beat estimates.\nRevenue up 5%.");
    }

    #[test]
    fn test_status_and_artifacts_merge_without_duplicates() {
        let t = task(
            Some("Summary ready.\nRevenue up 5%."),
            vec![
                vec![Part::text("Revenue up 5%.\n\n\n  Margins flat.  ")],
                vec![Part::text("Margins flat.")],
            ],
        );
        assert_eq!(
            extract_task_output(&t),
            "Summary ready.\nRevenue up 5%.\n\nMargins flat."
        );
    }

    #[test]
    fn test_data_and_file_parts() {
        let t = task(
            None,
            vec![vec![
                Part::Data { data: json!({"ticker": "AAPL"}) },
                Part::File {
                    file: FileContent { name: None, mime_type: None, bytes: None, uri: Some("s3://r".into()) },
                },
            ]],
        );
        assert_eq!(
            extract_task_output(&t),
            "{\n\"ticker\": \"AAPL\"\n}\n\nReceived file content (unknown mime type)."
        );
    }

    #[test]
    fn test_empty_task_is_empty() {
        assert_eq!(extract_task_output(&task(None, Vec::new())), "");
        assert_eq!(extract_task_output(&task(Some("  \n "), Vec::new())), "");
    }

    /// Serve a specialist on an ephemeral port; its card points at that port.
    async fn spawn_specialist(profile: SpecialistProfile, report: &str) -> String {
        spawn_agent(profile, Some(report.to_string())).await
    }

    async fn spawn_agent(profile: SpecialistProfile, report: Option<String>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let agent = SpecialistAgent::new(
            profile.agent_card(url.clone()),
            Arc::new(StaticExecutor { report }),
        );
        let app = specialist_app(Arc::new(agent));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        url
    }

    #[tokio::test]
    async fn test_create_skips_unreachable_agents() {
        let news = spawn_specialist(SpecialistProfile::News, "Headline.").await;
        let agent = RoutingAgent::create(&[news, "http://127.0.0.1:1".to_string()])
            .await
            .unwrap();

        let agents = agent.list_remote_agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "News Agent");
    }

    #[tokio::test]
    async fn test_finance_request_end_to_end() {
        let news = spawn_specialist(SpecialistProfile::News, "Headline.").await;
        let fin = spawn_specialist(SpecialistProfile::Financial, "NVDA revenue grew.\nGuidance raised.").await;
        let agent = RoutingAgent::create(&[news, fin]).await.unwrap();

        let reply = agent
            .handle_user_message("What was Q2 revenue for $NVDA?", "s1")
            .await;
        assert_eq!(
            reply,
            vec![
                "Policy check: financial intent with ticker(s) NVDA → routing to Financial specialist.",
                "NVDA revenue grew.\nGuidance raised.",
                "Policy summary:",
                "- Policy: financial intent with ticker(s): NVDA.",
            ]
        );
        assert_eq!(agent.session_history("s1").await.len(), 5);
        assert_eq!(agent.stats().await["Financial Agent"].total_requests, 1);
    }

    #[tokio::test]
    async fn test_finance_falls_back_to_news() {
        let news = spawn_specialist(SpecialistProfile::News, "Chip stocks rallied.").await;
        let agent = RoutingAgent::create(&[news]).await.unwrap();

        let reply = agent.handle_user_message("earnings for $AMD", "s1").await;
        assert_eq!(reply[1], "Chip stocks rallied.");
        assert_eq!(
            reply.last().unwrap(),
            "- Policy fallback: Financial specialist unavailable; falling back to News."
        );
    }

    #[tokio::test]
    async fn test_context_id_reused_per_session() {
        let news = spawn_specialist(SpecialistProfile::News, "ok").await;
        let agent = RoutingAgent::create(&[news]).await.unwrap();

        let first = agent.send_message("News Agent", "a", "s1").await.unwrap();
        let second = agent.send_message("News Agent", "b", "s1").await.unwrap();
        let other = agent.send_message("News Agent", "c", "s2").await.unwrap();
        assert_eq!(first.context_id, second.context_id);
        assert_ne!(first.context_id, other.context_id);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_none() {
        let agent = RoutingAgent::new(SpecialistRouter::new());
        assert!(agent.send_message("Ghost", "hi", "s1").await.is_none());
        assert!(matches!(
            agent.delegate("Ghost", "hi", "s1").await,
            Err(Error::UnknownAgent(name)) if name == "Ghost"
        ));
    }

    #[tokio::test]
    async fn test_failed_specialist_error_is_not_shown() {
        let news = spawn_agent(SpecialistProfile::News, None).await;
        let agent = RoutingAgent::create(&[news]).await.unwrap();

        let failed = agent.send_message("News Agent", "x", "s1").await.unwrap();
        assert_eq!(failed.status.state, TaskState::Failed);

        let reply = agent.handle_user_message("headlines about Lisbon", "s1").await;
        assert_eq!(reply[1], "The News specialist did not return a summary.");
        assert!(reply.iter().all(|chunk| !chunk.contains("model unavailable")));
    }

    #[tokio::test]
    async fn test_initialize_with_nothing_listening() {
        let settings = HostSettings {
            news_agent_url: "http://127.0.0.1:1".into(),
            fin_agent_url: "http://127.0.0.1:1".into(),
        };
        let agent = initialize_routing_agent(&settings).await.unwrap();
        assert!(agent.list_remote_agents().await.is_empty());
        let reply = agent.handle_user_message("news on Lisbon", "s").await;
        assert_eq!(
            reply.last().unwrap(),
            "- Policy fallback: No specialists available; responding directly."
        );
    }
}
