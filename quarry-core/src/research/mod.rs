//! Research controller: plans, searches, fetches, reflects and writes a
//! cited report.
//!
//! - **state**: the per-run aggregate and node enum
//! - **controller**: the node graph
//! - **fallback**: the three-tier model fallback
//! - **ai_search**: one-shot search summaries with numbered citations
//! - **cancel**: two-level cooperative cancellation
//! - **parse**: structured reading of model replies
//! - **prompts**: prompt templates
//! - **result**: the returned result and its persistence

pub mod ai_search;
pub mod callback;
pub mod cancel;
pub mod controller;
mod fallback;
pub mod parse;
pub mod prompts;
pub mod result;
pub mod state;

pub use ai_search::{AiSearchOptions, AiSearchResult, AiSearcher, AiSource};
pub use callback::{NoOpResearchCallback, ResearchCallback};
pub use cancel::{CancelLevel, ResearchCancellation};
pub use controller::ResearchController;
pub use parse::{Reflection, ResearchPlan, is_relevant_url, parse_query_lines};
pub use result::{ResearchResult, ResearchStats, ResultSummary};
pub use state::{QueryAnalysis, ResearchState, ResearchStatus, SourceRecord};
