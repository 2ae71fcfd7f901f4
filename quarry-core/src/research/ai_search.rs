//! Single-shot search summaries: query the engines, read the top pages and
//! have the model answer with numbered citations.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::cancel::ResearchCancellation;
use super::fallback::with_fallback;
use super::parse::is_relevant_url;
use super::prompts;
use crate::citation::CitationLedger;
use crate::error::{QuarryError, Result};
use crate::fetch::{WebFetcher, domain_of};
use crate::llm::LanguageModel;
use crate::search::{SearchAggregator, SearchEngine, SearchOptions};

/// Characters of scraped text kept as a source preview.
const PREVIEW_CHARS: usize = 500;

/// Knobs for one [`AiSearcher::search`] call.
#[derive(Debug, Clone)]
pub struct AiSearchOptions {
    /// Engines to query; empty means the aggregator's defaults.
    pub engines: Vec<SearchEngine>,
    pub max_results: Option<usize>,
    /// How many of the top results to fetch for a content preview.
    pub max_pages: usize,
    pub detailed: bool,
    pub scrape: bool,
    pub dynamic: bool,
}

impl Default for AiSearchOptions {
    fn default() -> Self {
        Self {
            engines: Vec::new(),
            max_results: None,
            max_pages: 3,
            detailed: false,
            scrape: true,
            dynamic: false,
        }
    }
}

/// A source listed under an AI search summary. Its position in
/// [`AiSearchResult::sources`] is its citation number minus one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Engine that returned the result.
    pub origin: String,
    /// The snippet is a preview of the fetched page rather than the engine's.
    #[serde(default)]
    pub scraped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSearchResult {
    pub query: String,
    pub summary: String,
    pub sources: Vec<AiSource>,
    pub timestamp: DateTime<Utc>,
}

impl AiSearchResult {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# Search Results for: {}\n", self.query),
            format!(
                "*Generated on: {}*\n",
                self.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ),
            "## Summary\n".to_string(),
            format!("{}\n", self.summary.trim()),
            "## Sources\n".to_string(),
        ];
        for (i, source) in self.sources.iter().enumerate() {
            let title = if source.title.trim().is_empty() {
                "Untitled"
            } else {
                source.title.as_str()
            };
            lines.push(format!("### {}. {title}", i + 1));
            lines.push(format!("- **URL:** [{0}]({0})", source.url));
            lines.push(format!("- **Source:** {}", source.origin));
            if !source.snippet.is_empty() {
                lines.push(format!("- **Snippet:** {}", source.snippet));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// Search plus a cited model summary, without the iterative controller.
pub struct AiSearcher {
    model: Arc<dyn LanguageModel>,
    search: Arc<SearchAggregator>,
    fetcher: Option<Arc<WebFetcher>>,
    cancellation: ResearchCancellation,
}

impl AiSearcher {
    pub fn new(model: Arc<dyn LanguageModel>, search: Arc<SearchAggregator>) -> Self {
        Self {
            model,
            search,
            fetcher: None,
            cancellation: ResearchCancellation::new(),
        }
    }

    /// Enables page previews for the top results.
    pub fn with_fetcher(mut self, fetcher: Arc<WebFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_cancellation(mut self, cancellation: ResearchCancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Run the search and summarize it. Only an empty query is an error; a
    /// dead model yields a plain listing of the sources.
    pub async fn search(&self, query: &str, options: &AiSearchOptions) -> Result<AiSearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QuarryError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }
        let timestamp = Utc::now();
        let engines = if options.engines.is_empty() {
            self.search.default_engines().to_vec()
        } else {
            options.engines.clone()
        };
        let defaults = self.search.default_options();
        let search_options = SearchOptions {
            max_results: options.max_results.unwrap_or(defaults.max_results),
            strategy: defaults.strategy,
        };

        let results = self.search.search_with(query, &engines, &search_options).await;
        let mut seen = HashSet::new();
        let mut sources: Vec<AiSource> = results
            .into_iter()
            .filter(|r| seen.insert(r.url.clone()))
            .map(|r| AiSource {
                origin: r.engine.to_string(),
                title: r.title,
                url: r.url,
                snippet: r.snippet,
                scraped: false,
            })
            .collect();

        if options.scrape && options.max_pages > 0 {
            self.add_previews(&mut sources, options).await;
        }

        let summary = if sources.is_empty() {
            format!("No results found for \"{query}\".")
        } else {
            self.summarize(query, &sources, options.detailed).await
        };

        info!(query, sources = sources.len(), "AI search complete");
        Ok(AiSearchResult {
            query: query.to_string(),
            summary,
            sources,
            timestamp,
        })
    }

    async fn add_previews(&self, sources: &mut [AiSource], options: &AiSearchOptions) {
        let Some(fetcher) = &self.fetcher else {
            return;
        };
        let targets: Vec<usize> = sources
            .iter()
            .enumerate()
            .filter(|(_, s)| is_relevant_url(&s.url))
            .take(options.max_pages)
            .map(|(i, _)| i)
            .collect();
        let urls: Vec<String> = targets.iter().map(|&i| sources[i].url.clone()).collect();
        debug!(pages = urls.len(), "Fetching pages for previews");

        let pages = tokio::select! {
            pages = fetcher.fetch_many(&urls, options.dynamic) => pages,
            _ = self.cancellation.aborted() => return,
        };
        for (i, page) in targets.into_iter().zip(pages) {
            if !page.is_successful() {
                continue;
            }
            let source = &mut sources[i];
            source.snippet = preview(&page.text);
            source.scraped = true;
            if source.title.trim().is_empty() && !page.title.trim().is_empty() {
                source.title = page.title;
            }
        }
    }

    async fn summarize(&self, query: &str, sources: &[AiSource], detailed: bool) -> String {
        let mut ledger = CitationLedger::new();
        let listing = numbered_sources(sources);
        for source in sources {
            ledger.register_citation(&source.url);
        }
        let date = Local::now().format("%Y-%m-%d").to_string();

        let summary = with_fallback(
            &*self.model,
            &self.cancellation,
            "ai_search",
            prompts::ai_search(query, &listing, detailed, &date),
            prompts::ai_search_simple(query, &listing),
            |text| {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            },
            || default_summary(query, sources),
        )
        .await;

        let (summary, validation) = ledger.sanitize_citations(&summary);
        if !validation.invalid_ids.is_empty() {
            debug!(invalid = ?validation.invalid_ids, "Neutralized unknown citations in summary");
        }
        summary
    }
}

/// `[n] Domain` blocks handed to the model, numbered like the ledger.
fn numbered_sources(sources: &[AiSource]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {}\nTitle: {}\nURL: {}\nSnippet: {}\n\n",
            i + 1,
            site_name(&source.url),
            source.title,
            source.url,
            source.snippet
        ));
    }
    out
}

/// "arxiv.org" becomes "Arxiv".
fn site_name(url: &str) -> String {
    let Some(domain) = domain_of(url) else {
        return "Unknown Source".to_string();
    };
    let label = domain.split('.').next().unwrap_or(&domain);
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => domain.clone(),
    }
}

fn preview(text: &str) -> String {
    let text = text.trim();
    let head = prompts::head(text, PREVIEW_CHARS);
    if head.len() < text.len() {
        format!("{}...(truncated)", head.trim_end())
    } else {
        head.to_string()
    }
}

fn default_summary(query: &str, sources: &[AiSource]) -> String {
    let mut out = format!("Top results for \"{query}\":\n");
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("\n- {} [{}]", source.title.trim(), i + 1));
        let snippet = prompts::head(source.snippet.trim(), 200);
        if !snippet.is_empty() {
            out.push_str(&format!(": {snippet}"));
        }
    }
    out.push('\n');
    out
}
