//! # Quarry Core
//!
//! Core library for the Quarry research pipeline.
//! Provides multi-engine search aggregation, page fetching and extraction,
//! a citation ledger of sources and learnings, and the research controller
//! that drives a language model through iterative research.

pub mod cache;
pub mod citation;
pub mod config;
pub mod error;
pub mod fetch;
pub mod llm;
pub mod persistence;
pub mod research;
pub mod search;

// Re-export commonly used types at the crate root.
pub use cache::SourceCache;
pub use citation::{CitationLedger, CitationStyle, Learning, SourceInfo, SourceType};
pub use config::{QuarryConfig, ResearchConfig, load_config};
pub use error::{QuarryError, Result};
pub use fetch::{ScrapedContent, WebFetcher};
pub use llm::{LanguageModel, MockLanguageModel, OpenAiCompatibleModel};
pub use research::{
    NoOpResearchCallback, ResearchCallback, ResearchCancellation, ResearchController,
    ResearchResult, ResearchStatus,
};
pub use search::{MergeStrategy, SearchAggregator, SearchEngine, SearchResult};
