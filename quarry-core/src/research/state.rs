//! The mutable aggregate a research run works on.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::search::SearchEngine;

/// Controller node currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Initialize,
    GenerateQueries,
    Search,
    Reflect,
    SelectSources,
    FormatCitations,
    SynthesizeReport,
    Finalize,
    Complete,
}

impl ResearchStatus {
    /// Rough completion fraction for progress displays.
    pub fn progress(&self) -> f32 {
        match self {
            Self::Initialize => 0.0,
            Self::GenerateQueries => 0.1,
            Self::Search => 0.2,
            Self::Reflect => 0.5,
            Self::SelectSources => 0.6,
            Self::FormatCitations => 0.7,
            Self::SynthesizeReport => 0.8,
            Self::Finalize => 0.95,
            Self::Complete => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "Initialize",
            Self::GenerateQueries => "GenerateQueries",
            Self::Search => "Search",
            Self::Reflect => "Reflect",
            Self::SelectSources => "SelectSources",
            Self::FormatCitations => "FormatCitations",
            Self::SynthesizeReport => "SynthesizeReport",
            Self::Finalize => "Finalize",
            Self::Complete => "Complete",
        }
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search hit kept as a candidate source, tagged with the sub-query that
/// found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub engine: SearchEngine,
    pub query: String,
    /// Whether the page was fetched and extracted successfully.
    #[serde(default)]
    pub fetched: bool,
}

/// Model analysis of one sub-query's fetched content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    pub sources: Vec<String>,
    pub analysis: String,
}

/// Everything a run accumulates. Owned by one controller; never shared.
#[derive(Debug, Clone)]
pub struct ResearchState {
    pub query: String,
    pub depth: u32,
    pub breadth: u32,
    /// Completed Search passes. Never decreases.
    pub current_depth: u32,
    /// Search passes started, counted against the iteration ceiling.
    pub iterations: u32,
    /// Append-only running notes.
    pub findings: String,
    pub sources: Vec<SourceRecord>,
    pub subqueries: Vec<String>,
    /// Sub-queries generated for the next Search pass.
    pub pending_queries: Vec<String>,
    pub analyses: Vec<QueryAnalysis>,
    pub selected_sources: Vec<String>,
    pub formatted_citations: String,
    pub initial_report: Option<String>,
    pub enhanced_report: Option<String>,
    pub final_report: Option<String>,
    pub status: ResearchStatus,
    pub cancelled: bool,
    pub interrupted: bool,
    pub chain_of_thought: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// `YYYY-MM-DD`, injected into prompts.
    pub current_date: String,
}

impl ResearchState {
    pub fn new(query: &str, depth: u32, breadth: u32) -> Self {
        Self {
            query: query.to_string(),
            depth,
            breadth,
            current_depth: 0,
            iterations: 0,
            findings: String::new(),
            sources: Vec::new(),
            subqueries: Vec::new(),
            pending_queries: Vec::new(),
            analyses: Vec::new(),
            selected_sources: Vec::new(),
            formatted_citations: String::new(),
            initial_report: None,
            enhanced_report: None,
            final_report: None,
            status: ResearchStatus::Initialize,
            cancelled: false,
            interrupted: false,
            chain_of_thought: Vec::new(),
            started_at: Utc::now(),
            current_date: Local::now().format("%Y-%m-%d").to_string(),
        }
    }

    /// Append a timestamped entry and return it.
    pub fn log_thought(&mut self, thought: &str) -> String {
        let entry = format!("[{}] {thought}", Local::now().format("%H:%M:%S"));
        self.chain_of_thought.push(entry.clone());
        entry
    }

    pub fn transition(&mut self, status: ResearchStatus) {
        self.status = status;
    }

    /// URLs whose pages were fetched successfully, in discovery order.
    pub fn fetched_urls(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.sources
            .iter()
            .filter(|s| s.fetched && seen.insert(s.url.as_str()))
            .map(|s| s.url.clone())
            .collect()
    }

    /// Distinct candidate URLs, in discovery order.
    pub fn source_urls(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.sources
            .iter()
            .filter(|s| seen.insert(s.url.as_str()))
            .map(|s| s.url.clone())
            .collect()
    }

    pub fn append_findings(&mut self, text: &str) {
        self.findings.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, fetched: bool) -> SourceRecord {
        SourceRecord {
            url: url.to_string(),
            title: String::new(),
            snippet: String::new(),
            engine: SearchEngine::DuckDuckGo,
            query: "q".to_string(),
            fetched,
        }
    }

    #[test]
    fn test_log_thought_is_timestamped() {
        let mut state = ResearchState::new("q", 1, 1);
        let entry = state.log_thought("planning");
        assert!(entry.starts_with('['));
        assert_eq!(&entry[9..], "] planning");
        assert_eq!(state.chain_of_thought.len(), 1);
    }

    #[test]
    fn test_urls_dedup_in_order() {
        let mut state = ResearchState::new("q", 1, 1);
        state.sources = vec![
            record("https://b.com", true),
            record("https://a.com", false),
            record("https://b.com", true),
            record("https://c.com", true),
        ];
        assert_eq!(state.fetched_urls(), vec!["https://b.com", "https://c.com"]);
        assert_eq!(
            state.source_urls(),
            vec!["https://b.com", "https://a.com", "https://c.com"]
        );
    }

    #[test]
    fn test_status_display_and_progress() {
        assert_eq!(ResearchStatus::Complete.to_string(), "Complete");
        assert_eq!(
            serde_json::to_string(&ResearchStatus::GenerateQueries).unwrap(),
            "\"generate_queries\""
        );
        assert!(ResearchStatus::Search.progress() < ResearchStatus::Finalize.progress());
    }
}
