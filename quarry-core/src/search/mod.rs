//! Multi-engine search aggregation.
//!
//! [`SearchAggregator`] fans a query out to several engines under a shared
//! concurrency bound, caches each engine's list, and merges the lists into
//! one deduplicated ranking.

mod aggregator;
mod backend;
mod merge;
mod parsers;

pub use aggregator::{SearchAggregator, SearchOptions};
pub use backend::{HttpSearchBackend, SearchBackend, random_user_agent};
pub use merge::{merge_results, normalize_query};
pub use parsers::{
    parse_bing_results, parse_duckduckgo_results, parse_google_results, parse_wikipedia_results,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported search engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Google,
    DuckDuckGo,
    Bing,
    Wikipedia,
}

impl SearchEngine {
    pub const ALL: [SearchEngine; 4] = [
        SearchEngine::Google,
        SearchEngine::DuckDuckGo,
        SearchEngine::Bing,
        SearchEngine::Wikipedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEngine::Google => "google",
            SearchEngine::DuckDuckGo => "duckduckgo",
            SearchEngine::Bing => "bing",
            SearchEngine::Wikipedia => "wikipedia",
        }
    }
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(SearchEngine::Google),
            "duckduckgo" | "ddg" => Ok(SearchEngine::DuckDuckGo),
            "bing" => Ok(SearchEngine::Bing),
            "wikipedia" | "wiki" => Ok(SearchEngine::Wikipedia),
            other => Err(format!("unknown search engine: {other}")),
        }
    }
}

/// Ordering applied after per-engine lists are merged and deduplicated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Round-robin across engines, preserving each engine's own ranking.
    #[default]
    Alternate,
    /// Trust bucket first, then keyword overlap and recency.
    Relevance,
    /// Newest first, undated last.
    Date,
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alternate" => Ok(MergeStrategy::Alternate),
            "relevance" => Ok(MergeStrategy::Relevance),
            "date" => Ok(MergeStrategy::Date),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub engine: SearchEngine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl SearchResult {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
        engine: SearchEngine,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            engine,
            date: None,
        }
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Host of the result URL, without a leading `www.`.
    pub fn domain(&self) -> String {
        crate::fetch::domain_of(&self.url).unwrap_or_default()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("- [{}]({})", self.title, self.url);
        if !self.snippet.is_empty() {
            out.push_str(&format!("\n  {}", self.snippet));
        }
        out.push_str(&format!("\n  _via {}_", self.engine));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parse_and_display() {
        assert_eq!("DDG".parse::<SearchEngine>().unwrap(), SearchEngine::DuckDuckGo);
        assert_eq!(SearchEngine::Wikipedia.to_string(), "wikipedia");
        assert!("altavista".parse::<SearchEngine>().is_err());
    }

    #[test]
    fn test_engine_serde_names() {
        let json = serde_json::to_string(&SearchEngine::DuckDuckGo).unwrap();
        assert_eq!(json, "\"duckduckgo\"");
    }

    #[test]
    fn test_result_markdown() {
        let r = SearchResult::new(
            "https://example.com/a",
            "Example",
            "A snippet",
            SearchEngine::Bing,
        );
        let md = r.to_markdown();
        assert!(md.starts_with("- [Example](https://example.com/a)"));
        assert!(md.contains("_via bing_"));
        assert_eq!(r.domain(), "example.com");
    }
}
