//! News/Financial routing policy.
//!
//! A request goes to the Financial specialist only when it expresses
//! financial intent *and* names at least one recognizable ticker. Anything
//! else goes to News.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const FINANCE_KEYWORDS: &[&str] = &[
    "earnings",
    "revenue",
    "guidance",
    "eps",
    "dividend",
    "split",
    "stock",
    "share price",
    "price target",
    "valuation",
    "market cap",
    "cash flow",
    "balance sheet",
    "income statement",
    "analyst",
    "buyback",
    "quarter",
    "q1",
    "q2",
    "q3",
    "q4",
    "10-k",
    "10q",
    "10-q",
    "sec filing",
    "financial results",
    "results",
    "outlook",
];

const TICKER: &str = r"(?P<ticker>[A-Z]{1,5}(?:\.[A-Z]{1,3})?)";

/// Ticker notations, in match order:
/// `$AAPL`, `NASDAQ:GOOG`, `ticker symbol MSFT`, `(symbol: IBM)`.
fn ticker_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            format!(r"\${TICKER}\b"),
            format!(r"(?i)\b(?:NASDAQ|NYSE|AMEX|ASX|TSX|LSE|NSE|BSE)\s*[:\-]\s*{TICKER}\b"),
            format!(r"(?i)\b(?:ticker(?:\s+symbol)?|symbol)\s*[:=]?\s*{TICKER}\b"),
            format!(r"(?i)\((?:\s*(?:ticker(?:\s+symbol)?|symbol)\s*[:=]?\s*{TICKER}\s*)\)"),
        ]
        .iter()
        .map(|p| Regex::new(p).expect("ticker pattern is valid"))
        .collect()
    })
}

/// Which specialist a request is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    News,
    Finance,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::News => f.write_str("news"),
            Route::Finance => f.write_str("finance"),
        }
    }
}

/// How the host should react to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyClassification {
    pub route: Route,
    /// Extracted symbols, upper-cased and sorted. Empty if none found.
    pub tickers: Vec<String>,
    pub is_financial: bool,
    /// Short note for the policy summary.
    pub note: Option<String>,
}

/// Keyword and ticker based classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewsFinancePolicyManager;

impl NewsFinancePolicyManager {
    pub fn new() -> Self {
        Self
    }

    /// Classify a user message.
    pub fn classify_request(&self, message: &str) -> PolicyClassification {
        let lowered = message.trim().to_lowercase();
        let is_financial = FINANCE_KEYWORDS.iter().any(|k| lowered.contains(k));
        let tickers = self.extract_tickers(message);

        let (route, note) = if is_financial && !tickers.is_empty() {
            (
                Route::Finance,
                format!("Policy: financial intent with ticker(s): {}.", tickers.join(", ")),
            )
        } else {
            (
                Route::News,
                "Policy: route to News (non-financial or no ticker detected).".to_string(),
            )
        };

        PolicyClassification {
            route,
            tickers,
            is_financial,
            note: Some(note),
        }
    }

    /// Extract ticker symbols from the raw (case-preserved) message.
    pub fn extract_tickers(&self, message: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        for pattern in ticker_patterns() {
            for caps in pattern.captures_iter(message) {
                if let Some(m) = caps.name("ticker") {
                    let ticker = m.as_str().to_uppercase();
                    if (1..=6).contains(&ticker.len()) {
                        seen.insert(ticker);
                    }
                }
            }
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> PolicyClassification {
        NewsFinancePolicyManager::new().classify_request(message)
    }

    #[test]
    fn test_financial_with_dollar_ticker() {
        let c = classify("What were the Q3 earnings for $AAPL?");
        assert_eq!(c.route, Route::Finance);
        assert!(c.is_financial);
        assert_eq!(c.tickers, vec!["AAPL"]);
        assert_eq!(
            c.note.as_deref(),
            Some("Policy: financial intent with ticker(s): AAPL.")
        );
    }

    #[test]
    fn test_exchange_prefix_is_case_insensitive() {
        let c = classify("Dividend outlook for nasdaq:goog and NYSE - IBM");
        assert_eq!(c.route, Route::Finance);
        assert_eq!(c.tickers, vec!["GOOG", "IBM"]);
    }

    #[test]
    fn test_ticker_keyword_forms() {
        let pm = NewsFinancePolicyManager::new();
        assert_eq!(pm.extract_tickers("ticker symbol MSFT"), vec!["MSFT"]);
        assert_eq!(pm.extract_tickers("symbol=nvda please"), vec!["NVDA"]);
        assert_eq!(pm.extract_tickers("Shopify (ticker: SHOP)"), vec!["SHOP"]);
        assert_eq!(pm.extract_tickers("BP plc (LSE:BP.L)"), vec!["BP.L"]);
    }

    #[test]
    fn test_dollar_pattern_is_case_sensitive() {
        let pm = NewsFinancePolicyManager::new();
        assert!(pm.extract_tickers("it costs $aapl").is_empty());
        assert!(pm.extract_tickers("it costs $5").is_empty());
    }

    #[test]
    fn test_tickers_are_deduplicated_and_sorted() {
        let pm = NewsFinancePolicyManager::new();
        let tickers = pm.extract_tickers("$MSFT vs $AAPL, also NASDAQ:AAPL and ticker MSFT");
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_financial_without_ticker_goes_to_news() {
        let c = classify("How did tech stocks do this quarter?");
        assert!(c.is_financial);
        assert!(c.tickers.is_empty());
        assert_eq!(c.route, Route::News);
        assert_eq!(
            c.note.as_deref(),
            Some("Policy: route to News (non-financial or no ticker detected).")
        );
    }

    #[test]
    fn test_ticker_without_financial_intent_goes_to_news() {
        let c = classify("Any headlines about $TSLA today?");
        assert!(!c.is_financial);
        assert_eq!(c.tickers, vec!["TSLA"]);
        assert_eq!(c.route, Route::News);
    }

    #[test]
    fn test_plain_news_question() {
        let c = classify("Find recent news articles about Google.");
        assert_eq!(c.route, Route::News);
        assert!(c.tickers.is_empty());
    }

    #[test]
    fn test_route_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Route::Finance).unwrap(), "\"finance\"");
        assert_eq!(Route::News.to_string(), "news");
    }
}
