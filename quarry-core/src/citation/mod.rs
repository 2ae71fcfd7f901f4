//! Source and learning provenance.
//!
//! The [`CitationLedger`] owns every source seen during a run, the
//! deduplicated learnings extracted from them, and the stable citation ids
//! a report uses to point back at those sources.

mod bibliography;
mod ledger;
mod similarity;

pub use bibliography::{BibliographyEntry, format_bibliography};
pub use ledger::{CitationLedger, CitationValidation, LearningStatistics, LedgerSnapshot};
pub use similarity::{CharJaccard, SimilarityScorer, TokenJaccard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::fetch::{ScrapedContent, domain_of};

/// Placeholder for a missing title.
pub const UNTITLED: &str = "Untitled";
/// Placeholder for a missing access date.
pub const NO_DATE: &str = "n.d.";
/// Placeholder for a missing domain or URL.
pub const UNKNOWN: &str = "unknown";

/// Bibliography template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Apa,
    Mla,
    #[serde(alias = "default")]
    Plain,
}

impl CitationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStyle::Apa => "apa",
            CitationStyle::Mla => "mla",
            CitationStyle::Plain => "plain",
        }
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationStyle {
    type Err = std::convert::Infallible;

    /// Unrecognized keywords select the plain template.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "apa" => CitationStyle::Apa,
            "mla" => CitationStyle::Mla,
            _ => CitationStyle::Plain,
        })
    }
}

/// Authority class of a source, derived from its domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Academic,
    Encyclopedic,
    Official,
    News,
    Blog,
    Forum,
    #[default]
    Other,
}

const ACADEMIC_DOMAINS: &[&str] = &[
    "arxiv.org",
    "scholar.google.com",
    "semanticscholar.org",
    "researchgate.net",
    "ncbi.nlm.nih.gov",
    "pubmed.ncbi.nlm.nih.gov",
    "nature.com",
    "science.org",
    "sciencedirect.com",
    "springer.com",
    "link.springer.com",
    "ieee.org",
    "ieeexplore.ieee.org",
    "acm.org",
    "dl.acm.org",
    "jstor.org",
    "wiley.com",
    "onlinelibrary.wiley.com",
    "plos.org",
    "mdpi.com",
    "biorxiv.org",
    "ssrn.com",
];

const ENCYCLOPEDIC_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "britannica.com",
    "encyclopedia.com",
    "scholarpedia.org",
    "plato.stanford.edu",
    "wikimedia.org",
];

const NEWS_DOMAINS: &[&str] = &[
    "reuters.com",
    "apnews.com",
    "bbc.com",
    "bbc.co.uk",
    "nytimes.com",
    "theguardian.com",
    "washingtonpost.com",
    "wsj.com",
    "ft.com",
    "bloomberg.com",
    "economist.com",
    "npr.org",
    "cnn.com",
    "aljazeera.com",
    "forbes.com",
    "theverge.com",
    "arstechnica.com",
    "wired.com",
];

const BLOG_DOMAINS: &[&str] = &[
    "medium.com",
    "substack.com",
    "wordpress.com",
    "blogspot.com",
    "dev.to",
    "hashnode.dev",
    "tumblr.com",
];

const FORUM_DOMAINS: &[&str] = &[
    "reddit.com",
    "stackoverflow.com",
    "stackexchange.com",
    "quora.com",
    "news.ycombinator.com",
    "discourse.org",
];

fn matches_any(domain: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
}

impl SourceType {
    /// Classify a bare domain (no scheme, no `www.`).
    pub fn classify(domain: &str) -> Self {
        let domain = domain.trim().to_ascii_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain);
        if domain.is_empty() {
            return SourceType::Other;
        }
        // Checked before the .edu rule: plato.stanford.edu is a reference work.
        if matches_any(domain, ENCYCLOPEDIC_DOMAINS) {
            return SourceType::Encyclopedic;
        }
        if matches_any(domain, ACADEMIC_DOMAINS)
            || domain.ends_with(".edu")
            || domain.contains(".edu.")
            || domain.contains(".ac.")
        {
            return SourceType::Academic;
        }
        if domain.ends_with(".gov")
            || domain.contains(".gov.")
            || domain.starts_with("gov.")
            || domain.ends_with(".mil")
            || domain.ends_with(".int")
            || domain.ends_with("europa.eu")
        {
            return SourceType::Official;
        }
        if matches_any(domain, NEWS_DOMAINS) || domain.starts_with("news.") {
            return SourceType::News;
        }
        if matches_any(domain, FORUM_DOMAINS) || domain.starts_with("forum.") {
            return SourceType::Forum;
        }
        if matches_any(domain, BLOG_DOMAINS) || domain.starts_with("blog.") {
            return SourceType::Blog;
        }
        SourceType::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Academic => "academic",
            SourceType::Encyclopedic => "encyclopedic",
            SourceType::Official => "official",
            SourceType::News => "news",
            SourceType::Blog => "blog",
            SourceType::Forum => "forum",
            SourceType::Other => "other",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one URL. The URL is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub domain: String,
    /// In `[0, 1]`; 0 means "not scored".
    #[serde(default)]
    pub reliability_score: f64,
    pub access_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SourceInfo {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        let domain = domain_of(&url).unwrap_or_else(|| UNKNOWN.to_string());
        Self {
            source_type: SourceType::classify(&domain),
            url,
            title: String::new(),
            snippet: String::new(),
            content_type: String::new(),
            domain,
            reliability_score: 0.0,
            access_time: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Source record for a successfully fetched page.
    pub fn from_scraped(content: &ScrapedContent, reliability_score: f64) -> Self {
        let mut info = Self::new(&content.url)
            .with_title(&content.title)
            .with_reliability(reliability_score);
        info.content_type = content.content_type.clone();
        info.snippet = content.text.chars().take(280).collect();
        info.metadata = content.metadata.clone();
        info
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.trim().to_string();
        self
    }

    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = snippet.trim().to_string();
        self
    }

    pub fn with_reliability(mut self, score: f64) -> Self {
        self.reliability_score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            UNTITLED
        } else {
            &self.title
        }
    }

    pub fn display_domain(&self) -> &str {
        if self.domain.is_empty() {
            UNKNOWN
        } else {
            &self.domain
        }
    }

    /// Fold a newer record for the same URL into this one. Non-empty fields
    /// of `newer` win; metadata is merged.
    fn absorb(&mut self, newer: SourceInfo) {
        if !newer.title.is_empty() {
            self.title = newer.title;
        }
        if !newer.snippet.is_empty() {
            self.snippet = newer.snippet;
        }
        if !newer.content_type.is_empty() {
            self.content_type = newer.content_type;
        }
        if !newer.domain.is_empty() && newer.domain != UNKNOWN {
            self.domain = newer.domain;
            self.source_type = newer.source_type;
        }
        if newer.reliability_score > 0.0 {
            self.reliability_score = newer.reliability_score;
        }
        self.access_time = self.access_time.max(newer.access_time);
        self.metadata.extend(newer.metadata);
    }
}

/// A deduplicated, source-attributed fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub quotes: Vec<String>,
    pub hash_id: String,
}

impl Learning {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into().trim().to_string();
        let hash_id = content_hash(&content);
        Self {
            content,
            sources: Vec::new(),
            confidence: 1.0,
            category: None,
            context: String::new(),
            quotes: Vec::new(),
            hash_id,
        }
    }

    pub fn with_source(mut self, url: &str) -> Self {
        let url = url.trim().to_string();
        if !url.is_empty() && !self.sources.contains(&url) {
            self.sources.push(url);
        }
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        let category = category.trim();
        self.category = (!category.is_empty()).then(|| category.to_string());
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.trim().to_string();
        self
    }

    pub fn with_quote(mut self, quote: &str) -> Self {
        let quote = quote.trim().to_string();
        if !quote.is_empty() && !self.quotes.contains(&quote) {
            self.quotes.push(quote);
        }
        self
    }
}

/// A citation id and the URL it stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub id: u32,
    pub url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// Lowercase, collapse whitespace, drop light punctuation.
pub fn normalize_content(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ',' | '.' | ';' | ':' | '!' | '?' | '"' | '\''))
        .collect()
}

/// Identity hash of a learning: the first 16 hex digits of the SHA-256 of
/// its normalized content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(content).as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_domains() {
        assert_eq!(SourceType::classify("arxiv.org"), SourceType::Academic);
        assert_eq!(SourceType::classify("cs.stanford.edu"), SourceType::Academic);
        assert_eq!(SourceType::classify("ox.ac.uk"), SourceType::Academic);
        assert_eq!(SourceType::classify("en.wikipedia.org"), SourceType::Encyclopedic);
        assert_eq!(SourceType::classify("plato.stanford.edu"), SourceType::Encyclopedic);
        assert_eq!(SourceType::classify("energy.gov"), SourceType::Official);
        assert_eq!(SourceType::classify("www.gov.uk"), SourceType::Official);
        assert_eq!(SourceType::classify("data.gov.uk"), SourceType::Official);
        assert_eq!(SourceType::classify("www.reuters.com"), SourceType::News);
        assert_eq!(SourceType::classify("someone.substack.com"), SourceType::Blog);
        assert_eq!(SourceType::classify("old.reddit.com"), SourceType::Forum);
        assert_eq!(SourceType::classify("example.com"), SourceType::Other);
        assert_eq!(SourceType::classify(""), SourceType::Other);
    }

    #[test]
    fn test_citation_style_parse() {
        assert_eq!("APA".parse::<CitationStyle>().unwrap(), CitationStyle::Apa);
        assert_eq!("mla".parse::<CitationStyle>().unwrap(), CitationStyle::Mla);
        assert_eq!("chicago".parse::<CitationStyle>().unwrap(), CitationStyle::Plain);
        let style: CitationStyle = serde_json::from_str("\"default\"").unwrap();
        assert_eq!(style, CitationStyle::Plain);
    }

    #[test]
    fn test_source_info_defaults() {
        let info = SourceInfo::new(" https://www.Nature.com/articles/x ");
        assert_eq!(info.url, "https://www.Nature.com/articles/x");
        assert_eq!(info.domain, "nature.com");
        assert_eq!(info.source_type, SourceType::Academic);
        assert_eq!(info.display_title(), UNTITLED);

        let broken = SourceInfo::new("not a url");
        assert_eq!(broken.display_domain(), UNKNOWN);
        assert!((SourceInfo::new("https://a.com").with_reliability(7.0).reliability_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hash_ignores_case_and_spacing() {
        assert_eq!(
            content_hash("Solar panels convert  sunlight."),
            content_hash("solar panels convert sunlight")
        );
        assert_ne!(content_hash("solar"), content_hash("wind"));
        assert_eq!(content_hash("x").len(), 16);
    }

    #[test]
    fn test_learning_builders_dedupe() {
        let learning = Learning::new("  Fact  ")
            .with_source("https://a.com")
            .with_source("https://a.com")
            .with_quote("q")
            .with_quote("q")
            .with_category("")
            .with_confidence(1.5);
        assert_eq!(learning.content, "Fact");
        assert_eq!(learning.sources.len(), 1);
        assert_eq!(learning.quotes.len(), 1);
        assert!(learning.category.is_none());
        assert!((learning.confidence - 1.0).abs() < 1e-9);
    }
}
