//! A2A specialist agents: the News and Financial executors, their agent
//! cards, and the in-memory task store behind `message/send`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel};
use crate::protocol::{
    AgentCapabilities, AgentCard, AgentSkill, Artifact, Message, MessageSendParams, Part, Role,
    Task, TaskState, TaskStatus,
};
use crate::retrieval::{Document, Retriever};
use crate::tools::{run_tool_loop, ToolRegistry};

/// Default bind address for specialists.
pub const DEFAULT_HOST: &str = "0.0.0.0";

const UNKNOWN_ANSWER: &str = "I don't know.";

/// Everything an executor needs to answer one message.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    pub message: Message,
    /// Earlier turns in the same context, oldest first.
    pub history: Vec<Message>,
}

impl RequestContext {
    pub fn user_input(&self) -> String {
        self.message.text_content()
    }
}

/// Executor output: a one-line status and the full report.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub status: String,
    pub report: String,
}

impl AgentReply {
    /// Build a reply whose status is the first non-empty line of `report`.
    pub fn from_report(report: impl Into<String>) -> Self {
        let report = report.into().trim().to_string();
        let report = if report.is_empty() {
            UNKNOWN_ANSWER.to_string()
        } else {
            report
        };
        let status = report
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(UNKNOWN_ANSWER)
            .to_string();
        Self { status, report }
    }
}

/// Answers A2A messages.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, context: RequestContext) -> Result<AgentReply>;
}

/// Which specialist an executor plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialistProfile {
    News,
    Financial,
}

impl SpecialistProfile {
    pub const fn default_port(self) -> u16 {
        match self {
            SpecialistProfile::News => 10001,
            SpecialistProfile::Financial => 10002,
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            SpecialistProfile::News => {
                "You are a news research assistant. Answer with a concise summary grounded in the \
                 provided articles when they are relevant, and cite them by their [n] marker. \
                 Use the available tools when they help. If you do not know, say \"I don't know\"."
            }
            SpecialistProfile::Financial => {
                "You are a financial analyst assistant. Use the available tools to look up quotes, \
                 fundamentals and filings for the requested tickers, and be concise. \
                 If data is unavailable, respond with \"I don't know\"."
            }
        }
    }

    /// Agent card advertised at `url`.
    pub fn agent_card(self, url: impl Into<String>) -> AgentCard {
        let (name, description, skill) = match self {
            SpecialistProfile::News => (
                "News Agent",
                "Helps with news search",
                AgentSkill {
                    id: "news_search".into(),
                    name: "Search news".into(),
                    description: "Helps with news search".into(),
                    tags: vec!["news search".into()],
                    examples: vec!["Find recent news articles about Google.".into()],
                },
            ),
            SpecialistProfile::Financial => (
                "Financial Agent",
                "Helps with financials",
                AgentSkill {
                    id: "financial_search".into(),
                    name: "Search financials".into(),
                    description: "Helps with financials for companies and tickers".into(),
                    tags: vec!["financial".into()],
                    examples: vec!["financials for AAPL".into()],
                },
            ),
        };
        AgentCard {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            version: "1.0.0".into(),
            default_input_modes: vec!["text".into()],
            default_output_modes: vec!["text".into()],
            capabilities: AgentCapabilities::default(),
            skills: vec![skill],
        }
    }
}

impl fmt::Display for SpecialistProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecialistProfile::News => write!(f, "news"),
            SpecialistProfile::Financial => write!(f, "financial"),
        }
    }
}

/// URL a specialist puts on its card: `APP_URL`, else `http://{host}:{port}`.
pub fn advertised_url(app_url: Option<&str>, host: &str, port: u16) -> String {
    match app_url {
        Some(url) => url.to_string(),
        None => format!("http://{host}:{port}"),
    }
}

/// LLM-backed specialist.
pub struct SpecialistExecutor {
    profile: SpecialistProfile,
    model: Arc<dyn ChatModel>,
    retriever: Option<Arc<dyn Retriever>>,
    tools: ToolRegistry,
    top_k: usize,
    max_tool_call_depth: usize,
}

impl SpecialistExecutor {
    pub fn new(profile: SpecialistProfile, model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self {
            profile,
            model,
            retriever: None,
            tools,
            top_k: 5,
            max_tool_call_depth: 4,
        }
    }

    /// Ground answers in the top `top_k` retrieved documents.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }

    pub fn with_max_tool_call_depth(mut self, depth: usize) -> Self {
        self.max_tool_call_depth = depth;
        self
    }

    /// Retrieval is best effort; a failing store leaves the answer ungrounded.
    async fn retrieve(&self, query: &str) -> Vec<Document> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        let search = async {
            let vectors = self.model.embed(&[query.to_string()]).await?;
            let vector = vectors
                .into_iter()
                .next()
                .ok_or_else(|| Error::Llm("no embedding returned".into()))?;
            retriever.search(&vector, self.top_k).await
        };
        match search.await {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Retrieval failed, answering without documents: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl AgentExecutor for SpecialistExecutor {
    async fn execute(&self, context: RequestContext) -> Result<AgentReply> {
        let query = context.user_input();
        if query.trim().is_empty() {
            return Err(Error::InvalidParams("message has no text parts".into()));
        }

        let mut messages = vec![ChatMessage::system(self.profile.system_prompt())];
        for turn in &context.history {
            let text = turn.text_content();
            messages.push(match turn.role {
                Role::User => ChatMessage::user(text),
                Role::Agent => ChatMessage::assistant(text),
            });
        }

        let documents = match self.profile {
            SpecialistProfile::News => self.retrieve(&query).await,
            SpecialistProfile::Financial => Vec::new(),
        };
        if !documents.is_empty() {
            messages.push(ChatMessage::system(format_documents(&documents)));
        }
        messages.push(ChatMessage::user(query));

        let answer = run_tool_loop(
            self.model.as_ref(),
            &self.tools,
            messages,
            self.max_tool_call_depth,
        )
        .await?;

        let mut report = answer.trim().to_string();
        if !documents.is_empty() && !report.is_empty() {
            report.push_str("\n\n");
            report.push_str(&format_sources(&documents));
        }
        Ok(AgentReply::from_report(report))
    }
}

fn format_documents(documents: &[Document]) -> String {
    let mut out = String::from("Relevant articles:\n");
    for (n, doc) in documents.iter().enumerate() {
        out.push_str(&format!("\n[{}] {}\n{}\n", n + 1, citation(doc), doc.text.trim()));
    }
    out
}

fn format_sources(documents: &[Document]) -> String {
    let lines: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(n, doc)| format!("[{}] {}", n + 1, citation(doc)))
        .collect();
    format!("Sources:\n{}", lines.join("\n"))
}

fn citation(doc: &Document) -> String {
    let mut cite = if doc.title.is_empty() { doc.id.clone() } else { doc.title.clone() };
    match (doc.source.is_empty(), &doc.published_at) {
        (false, Some(date)) => cite.push_str(&format!(" ({}, {})", doc.source, date)),
        (false, None) => cite.push_str(&format!(" ({})", doc.source)),
        (true, Some(date)) => cite.push_str(&format!(" ({date})")),
        (true, None) => {}
    }
    cite
}

/// In-memory tasks and per-context conversation history.
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    histories: RwLock<HashMap<String, Vec<Message>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Turns recorded for a context, oldest first.
    pub async fn history(&self, context_id: &str) -> Vec<Message> {
        self.histories
            .read()
            .await
            .get(context_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn append_history(&self, context_id: &str, turns: impl IntoIterator<Item = Message>) {
        self.histories
            .write()
            .await
            .entry(context_id.to_string())
            .or_default()
            .extend(turns);
    }

    /// Move a non-terminal task to `canceled`.
    pub async fn cancel(&self, task_id: &str) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        if task.status.state.is_terminal() {
            return Err(Error::TaskNotCancelable(task_id.to_string()));
        }
        task.status = TaskStatus::new(TaskState::Canceled, None);
        Ok(task.clone())
    }
}

/// Serves `message/send`, `tasks/get` and `tasks/cancel` for one executor.
pub struct SpecialistAgent {
    card: AgentCard,
    executor: Arc<dyn AgentExecutor>,
    store: TaskStore,
}

impl SpecialistAgent {
    pub fn new(card: AgentCard, executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            card,
            executor,
            store: TaskStore::new(),
        }
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Run the executor and return the finished task.
    ///
    /// Executor failures produce a `failed` task carrying the error text.
    pub async fn on_message_send(&self, params: MessageSendParams) -> Result<Task> {
        let mut message = params.message;
        let context_id = message
            .context_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        message.context_id = Some(context_id.clone());

        let mut task = Task::new(context_id.clone(), TaskState::Working);
        message.task_id = Some(task.id.clone());
        task.history.push(message.clone());
        self.store.save(task.clone()).await;

        let context = RequestContext {
            task_id: task.id.clone(),
            context_id: context_id.clone(),
            message: message.clone(),
            history: self.store.history(&context_id).await,
        };

        match self.executor.execute(context).await {
            Ok(reply) => {
                info!("{} completed task {}", self.card.name, task.id);
                let status = agent_message(&reply.status, &task);
                let answer = agent_message(&reply.report, &task);
                task.status = TaskStatus::new(TaskState::Completed, Some(status));
                task.artifacts.push(Artifact {
                    artifact_id: Uuid::new_v4().to_string(),
                    name: Some("report".into()),
                    parts: vec![Part::text(reply.report)],
                });
                self.store.append_history(&context_id, [message, answer]).await;
            }
            Err(e) => {
                warn!("{} failed task {}: {}", self.card.name, task.id, e);
                let status = agent_message(&e.to_string(), &task);
                task.status = TaskStatus::new(TaskState::Failed, Some(status));
            }
        }

        self.store.save(task.clone()).await;
        Ok(task)
    }

    pub async fn on_get_task(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(task_id)
            .await
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    pub async fn on_cancel_task(&self, task_id: &str) -> Result<Task> {
        self.store.cancel(task_id).await
    }
}

fn agent_message(text: &str, task: &Task) -> Message {
    let mut message = Message::text(Role::Agent, text).with_context_id(Some(task.context_id.clone()));
    message.task_id = Some(task.id.clone());
    message
}
