//! Directory of discovered specialists.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::client::RemoteAgentConnection;
use crate::protocol::AgentCard;

const FINANCE_MARKERS: &[&str] = &["financial", "finance", "stock", "market"];

/// Connections to remote agents plus which of them serve News and Finance.
#[derive(Default)]
pub struct SpecialistRouter {
    /// Connections keyed by card name.
    connections: HashMap<String, RemoteAgentConnection>,
    /// Card names in discovery order.
    order: Vec<String>,
    news_agent: Option<String>,
    finance_agent: Option<String>,
    stats: HashMap<String, AgentStats>,
}

impl SpecialistRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and check whether its card is a specialist.
    pub fn register(&mut self, connection: RemoteAgentConnection) {
        let name = connection.card().name.clone();
        self.track(connection.card());
        if self.connections.insert(name.clone(), connection).is_none() {
            self.order.push(name);
        }
    }

    /// First News-like card becomes the News specialist; first finance-like
    /// card becomes the Financial specialist. One card may fill both roles.
    fn track(&mut self, card: &AgentCard) {
        let name = card.name.to_lowercase();
        let description = card.description.to_lowercase();
        let mentions = |needle: &str| name.contains(needle) || description.contains(needle);

        if self.news_agent.is_none() && mentions("news") {
            info!("News specialist: {}", card.name);
            self.news_agent = Some(card.name.clone());
        }
        if self.finance_agent.is_none() && FINANCE_MARKERS.iter().any(|m| mentions(m)) {
            info!("Financial specialist: {}", card.name);
            self.finance_agent = Some(card.name.clone());
        }
    }

    pub fn news_agent(&self) -> Option<&str> {
        self.news_agent.as_deref()
    }

    pub fn finance_agent(&self) -> Option<&str> {
        self.finance_agent.as_deref()
    }

    pub fn connection(&self, name: &str) -> Option<&RemoteAgentConnection> {
        self.connections.get(name)
    }

    /// Name and description of every discovered agent.
    pub fn list_remote_agents(&self) -> Vec<RemoteAgentInfo> {
        self.order
            .iter()
            .filter_map(|name| self.connections.get(name))
            .map(|c| RemoteAgentInfo {
                name: c.card().name.clone(),
                description: c.card().description.clone(),
            })
            .collect()
    }

    /// Record a completed exchange with an agent.
    pub fn record_success(&mut self, name: &str, latency: Duration) {
        let stats = self.stats.entry(name.to_string()).or_default();
        stats.total_requests += 1;
        stats.last_latency_ms = Some(latency.as_millis() as u64);
    }

    /// Record a failed exchange with an agent.
    pub fn record_failure(&mut self, name: &str) {
        let stats = self.stats.entry(name.to_string()).or_default();
        stats.total_requests += 1;
        stats.failed_requests += 1;
    }

    pub fn stats(&self) -> HashMap<String, AgentStats> {
        self.stats.clone()
    }
}

/// Entry of [`SpecialistRouter::list_remote_agents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteAgentInfo {
    pub name: String,
    pub description: String,
}

/// Usage statistics for one remote agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub last_latency_ms: Option<u64>,
}
