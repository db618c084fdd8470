//! Host decision flow.
//!
//! ```text
//! classify_request -> evaluate_policy -> fetch_news    -> compose_response -> END
//!                                     -> fetch_finance -> compose_response -> END
//!                                     -> respond       -> compose_response -> END
//! ```
//!
//! The pure steps live here; the fetch steps need the network and are run
//! by [`crate::orchestrator::RoutingAgent`].

use serde::Serialize;

use crate::policy::{NewsFinancePolicyManager, Route};

/// Step of the host flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStep {
    ClassifyRequest,
    EvaluatePolicy,
    FetchNews,
    FetchFinance,
    ComposeResponse,
}

/// Concrete branch chosen by `evaluate_policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    FetchNews,
    FetchFinance,
    Respond,
}

/// Which specialists are currently reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Availability {
    pub news: bool,
    pub finance: bool,
}

/// State passed between steps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostGraphState {
    pub user_message: String,
    pub session_id: String,
    pub response_chunks: Vec<String>,
    pub policy_notes: Vec<String>,
    pub policy_route: Option<Route>,
    pub decision: Option<PolicyDecision>,
    pub tickers: Vec<String>,
    pub news_output: Option<String>,
    pub finance_output: Option<String>,
    /// Steps visited, in order.
    pub trace: Vec<HostStep>,
}

impl HostGraphState {
    pub fn new(user_message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Run the policy and open the reply with a policy-check line.
    pub fn classify_request(&mut self, policy: &NewsFinancePolicyManager) {
        self.trace.push(HostStep::ClassifyRequest);
        let classification = policy.classify_request(&self.user_message);

        self.response_chunks.clear();
        self.policy_notes.clear();
        if let Some(note) = classification.note {
            self.policy_notes.push(note);
        }

        let opening = match classification.route {
            Route::Finance => format!(
                "Policy check: financial intent with ticker(s) {} → routing to Financial specialist.",
                classification.tickers.join(", ")
            ),
            Route::News => "Policy check: routing to News specialist.".to_string(),
        };
        self.response_chunks.push(opening);
        self.tickers = classification.tickers;
        self.policy_route = Some(classification.route);
    }

    /// Turn the route into a concrete step, falling back on availability.
    pub fn evaluate_policy(&mut self, available: Availability) -> PolicyDecision {
        self.trace.push(HostStep::EvaluatePolicy);
        let route = self.policy_route.unwrap_or(Route::News);

        let decision = match route {
            Route::Finance if available.finance => PolicyDecision::FetchFinance,
            Route::Finance if available.news => {
                self.note("Policy fallback: Financial specialist unavailable; falling back to News.");
                PolicyDecision::FetchNews
            }
            Route::News if available.news => PolicyDecision::FetchNews,
            Route::News if available.finance && !self.tickers.is_empty() => {
                self.note(
                    "Policy fallback: News specialist unavailable; using Financial specialist due to provided ticker(s).",
                );
                PolicyDecision::FetchFinance
            }
            _ => {
                self.note("Policy fallback: No specialists available; responding directly.");
                PolicyDecision::Respond
            }
        };
        self.decision = Some(decision);
        decision
    }

    /// Task text sent to the News specialist.
    pub fn news_prompt(&self) -> String {
        format!(
            "You are the News specialist.\n\
             Provide a concise, up-to-date news summary relevant to the user's request. \
             If you reference articles, include short citations or source names.\n\
             User request:\n{}",
            self.user_message
        )
    }

    /// Task text sent to the Financial specialist.
    pub fn finance_prompt(&self) -> String {
        let tickers = if self.tickers.is_empty() {
            "N/A".to_string()
        } else {
            self.tickers.join(", ")
        };
        format!(
            "You are the Financial specialist.\n\
             Analyze the user's financial question focusing on the specified ticker symbols. \
             Prioritize recent results, guidance, valuation context, and material news. \
             If data is unknown, respond with 'I don't know'.\n\
             Tickers: {tickers}\n\
             User request:\n{}",
            self.user_message
        )
    }

    /// Record the News specialist's output. `None` means the specialist is offline.
    pub fn apply_news_output(&mut self, output: Option<String>) {
        self.trace.push(HostStep::FetchNews);
        let chunk = match output.as_deref().map(str::trim) {
            None => "News specialist is offline right now.".to_string(),
            Some("") => "The News specialist did not return a summary.".to_string(),
            Some(text) => text.to_string(),
        };
        self.response_chunks.push(chunk);
        self.news_output = Some(output.unwrap_or_default());
    }

    /// Record the Financial specialist's output. `None` means the specialist is offline.
    pub fn apply_finance_output(&mut self, output: Option<String>) {
        self.trace.push(HostStep::FetchFinance);
        let chunk = match output.as_deref().map(str::trim) {
            None => "Financial specialist is offline right now.".to_string(),
            Some("") => "The Financial specialist did not return an analysis.".to_string(),
            Some(text) => text.to_string(),
        };
        self.response_chunks.push(chunk);
        self.finance_output = Some(output.unwrap_or_default());
    }

    /// Append the policy summary.
    pub fn compose_response(&mut self) {
        self.trace.push(HostStep::ComposeResponse);
        if !self.policy_notes.is_empty() {
            self.response_chunks.push("Policy summary:".to_string());
            self.response_chunks
                .extend(self.policy_notes.iter().map(|note| format!("- {note}")));
        }
    }

    fn note(&mut self, note: &str) {
        self.policy_notes.push(note.to_string());
    }
}
