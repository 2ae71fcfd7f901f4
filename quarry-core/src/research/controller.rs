//! Depth-bounded iterative research.
//!
//! The controller walks a fixed node graph:
//!
//! ```text
//! Initialize -> GenerateQueries -> Search -+-> Reflect -> GenerateQueries
//!                                          |
//!                                          +-> SelectSources -> FormatCitations
//!                                              -> SynthesizeReport -> Finalize -> Complete
//! ```
//!
//! Every model call goes through the three-tier fallback in `fallback`
//! (primary prompt, simplified prompt, deterministic default), so a run
//! always completes with a report, even with a dead model.

use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::callback::ResearchCallback;
use super::cancel::ResearchCancellation;
use super::fallback;
use super::parse::{
    MINIMAL_REFLECTION, Reflection, ResearchPlan, is_relevant_url, minimal_plan,
    parse_query_lines, select_urls,
};
use super::prompts;
use super::result::{ResearchResult, ResearchStats};
use super::state::{QueryAnalysis, ResearchState, ResearchStatus, SourceRecord};
use crate::citation::{CitationLedger, SourceInfo};
use crate::config::ResearchConfig;
use crate::error::{QuarryError, Result};
use crate::fetch::{ScrapedContent, WebFetcher};
use crate::llm::LanguageModel;
use crate::search::{SearchAggregator, SearchEngine, SearchResult};

/// Sources kept when model-driven selection fails.
const FALLBACK_SELECTION: usize = 20;
/// Characters of page text per source handed to the analysis prompt.
const ANALYSIS_CHARS_PER_SOURCE: usize = 3000;
const FINDINGS_TAIL_CHARS: usize = 6000;
const REPORT_FINDINGS_CHARS: usize = 16000;

/// What one sub-query produced.
struct SubQueryOutcome {
    query: String,
    records: Vec<SourceRecord>,
    /// Successfully fetched pages, recorded in the ledger after the fan-in.
    pages: Vec<ScrapedContent>,
    analysis: QueryAnalysis,
}

/// Orchestrates search, fetch, ledger and model into a research report.
pub struct ResearchController {
    model: Arc<dyn LanguageModel>,
    search: Arc<SearchAggregator>,
    fetcher: Arc<WebFetcher>,
    ledger: Arc<Mutex<CitationLedger>>,
    config: ResearchConfig,
    cancellation: ResearchCancellation,
    callback: Option<Arc<dyn ResearchCallback>>,
    engines: Vec<SearchEngine>,
    dynamic: bool,
}

impl ResearchController {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<SearchAggregator>,
        fetcher: Arc<WebFetcher>,
        config: ResearchConfig,
    ) -> Self {
        let engines = search.default_engines().to_vec();
        let dynamic = config.dynamic_fetch;
        Self {
            model,
            search,
            fetcher,
            ledger: Arc::new(Mutex::new(CitationLedger::new())),
            config,
            cancellation: ResearchCancellation::new(),
            callback: None,
            engines,
            dynamic,
        }
    }

    /// Share an existing ledger, e.g. to export it after the run.
    pub fn with_ledger(mut self, ledger: Arc<Mutex<CitationLedger>>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_cancellation(mut self, cancellation: ResearchCancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Engines to query; an empty list keeps the aggregator's defaults.
    pub fn with_engines(mut self, engines: Vec<SearchEngine>) -> Self {
        if !engines.is_empty() {
            self.engines = engines;
        }
        self
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn cancellation(&self) -> ResearchCancellation {
        self.cancellation.clone()
    }

    pub fn ledger(&self) -> Arc<Mutex<CitationLedger>> {
        Arc::clone(&self.ledger)
    }

    fn lock_ledger(&self) -> MutexGuard<'_, CitationLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a research session to completion.
    ///
    /// `depth` and `breadth` are clamped to `1..=max_depth` and
    /// `1..=max_breadth`. Only an empty query is an error; model, search and
    /// fetch failures degrade the report instead.
    pub async fn run(&self, query: &str, depth: u32, breadth: u32) -> Result<ResearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QuarryError::InvalidInput(
                "research query must not be empty".to_string(),
            ));
        }
        let depth = depth.clamp(1, self.config.max_depth.max(1));
        let breadth = breadth.clamp(1, self.config.max_breadth.max(1));
        let started = Instant::now();
        let mut state = ResearchState::new(query, depth, breadth);

        info!(
            query,
            depth,
            breadth,
            engines = self.engines.len(),
            model = self.model.model_name(),
            "Starting research"
        );

        let mut next = Some(ResearchStatus::Initialize);
        while let Some(planned) = next {
            let status = self.redirect_on_cancel(&mut state, planned);
            self.enter(&mut state, status);
            next = match status {
                ResearchStatus::Initialize => {
                    self.initialize(&mut state).await;
                    Some(ResearchStatus::GenerateQueries)
                }
                ResearchStatus::GenerateQueries => {
                    self.generate_queries(&mut state).await;
                    Some(ResearchStatus::Search)
                }
                ResearchStatus::Search => {
                    self.search_pass(&mut state).await;
                    if self.should_continue(&mut state) {
                        Some(ResearchStatus::Reflect)
                    } else {
                        Some(ResearchStatus::SelectSources)
                    }
                }
                ResearchStatus::Reflect => {
                    self.reflect(&mut state).await;
                    Some(ResearchStatus::GenerateQueries)
                }
                ResearchStatus::SelectSources => {
                    self.select_sources(&mut state).await;
                    Some(ResearchStatus::FormatCitations)
                }
                ResearchStatus::FormatCitations => {
                    self.format_citations(&mut state);
                    Some(ResearchStatus::SynthesizeReport)
                }
                ResearchStatus::SynthesizeReport => {
                    self.synthesize(&mut state).await;
                    Some(ResearchStatus::Finalize)
                }
                ResearchStatus::Finalize => {
                    self.finalize(&mut state);
                    Some(ResearchStatus::Complete)
                }
                ResearchStatus::Complete => None,
            };
        }

        let result = self.build_result(state, started.elapsed().as_secs_f64());
        info!(
            query,
            elapsed_secs = result.research_stats.elapsed_secs,
            sources = result.research_stats.fetched_sources,
            interrupted = result.interrupted,
            "Research complete"
        );
        Ok(result)
    }

    /// Apply cancellation at a node boundary. Abort skips straight to
    /// Finalize; a graceful request skips the remaining research passes.
    /// Sub-queries that were already generated still get their search pass,
    /// which then routes to SelectSources through `should_continue`.
    fn redirect_on_cancel(&self, state: &mut ResearchState, planned: ResearchStatus) -> ResearchStatus {
        use ResearchStatus::*;
        if self.cancellation.is_aborted() && !matches!(planned, Finalize | Complete) {
            self.mark_cancelled(state, "Abort requested; finalizing with current findings");
            return Finalize;
        }
        if !self.cancellation.is_cancelled() {
            return planned;
        }
        match planned {
            Search if !state.pending_queries.is_empty() => {
                self.mark_cancelled(state, "Stop requested; finishing the current search pass");
                Search
            }
            Initialize | GenerateQueries | Search | Reflect => {
                self.mark_cancelled(state, "Stop requested; skipping to report generation");
                SelectSources
            }
            _ => planned,
        }
    }

    fn mark_cancelled(&self, state: &mut ResearchState, thought: &str) {
        if !state.cancelled {
            state.cancelled = true;
            state.interrupted = true;
            info!(level = ?self.cancellation.level(), "Research cancelled");
            self.think(state, thought);
        }
    }

    fn enter(&self, state: &mut ResearchState, status: ResearchStatus) {
        state.transition(status);
        info!(node = %status, current_depth = state.current_depth, "Entering node");
        if let Some(ref cb) = self.callback {
            cb.on_status_change(status, status.progress());
        }
    }

    fn think(&self, state: &mut ResearchState, thought: &str) {
        let entry = state.log_thought(thought);
        debug!(thought = %entry, "Chain of thought");
        if let Some(ref cb) = self.callback {
            cb.on_thought(&entry);
        }
    }

    async fn with_fallback<T>(
        &self,
        node: &'static str,
        primary: String,
        simplified: String,
        parse: impl Fn(&str) -> Option<T>,
        default: impl FnOnce() -> T,
    ) -> T {
        fallback::with_fallback(
            &*self.model,
            &self.cancellation,
            node,
            primary,
            simplified,
            parse,
            default,
        )
        .await
    }

    // --- Nodes ---

    async fn initialize(&self, state: &mut ResearchState) {
        let query = state.query.clone();
        let plan = self
            .with_fallback(
                "initialize",
                prompts::plan(&query, &state.current_date),
                prompts::plan_simple(&query),
                |text| non_empty(text).map(|t| ResearchPlan::parse(t, &query).to_markdown()),
                || minimal_plan(&query),
            )
            .await;
        state.findings = format!("{}\n\n# Initial Findings\n\n", plan.trim_end());
        self.think(state, &format!("Created research plan for query: {query}"));
    }

    async fn generate_queries(&self, state: &mut ResearchState) {
        let query = state.query.clone();
        let breadth = state.breadth;
        let explored: HashSet<String> = state.subqueries.iter().map(|q| q.to_lowercase()).collect();
        let findings = prompts::tail(&state.findings, FINDINGS_TAIL_CHARS).to_string();

        let queries = self
            .with_fallback(
                "generate_queries",
                prompts::queries(&query, &findings, breadth, &state.current_date),
                prompts::queries_simple(&query, breadth),
                |text| {
                    let fresh: Vec<String> = parse_query_lines(text, u32::MAX)
                        .into_iter()
                        .filter(|q| !explored.contains(&q.to_lowercase()))
                        .take(breadth as usize)
                        .collect();
                    if fresh.is_empty() { None } else { Some(fresh) }
                },
                || vec![query.clone()],
            )
            .await;

        if let Some(ref cb) = self.callback {
            cb.on_queries_generated(&queries);
        }
        self.think(
            state,
            &format!("Generated {} search queries: {}", queries.len(), queries.join("; ")),
        );
        state.subqueries.extend(queries.iter().cloned());
        state.pending_queries = queries;
    }

    async fn search_pass(&self, state: &mut ResearchState) {
        state.iterations += 1;
        let queries = std::mem::take(&mut state.pending_queries);
        let main_query = state.query.clone();
        let date = state.current_date.clone();

        let batch = join_all(
            queries
                .iter()
                .map(|q| self.process_subquery(q, &main_query, &date)),
        );
        let outcomes = tokio::select! {
            outcomes = batch => outcomes,
            _ = self.cancellation.aborted() => {
                self.mark_cancelled(state, "Abort requested during search; dropping in-flight work");
                return;
            }
        };

        // Recording happens only once the whole pass has landed, so an abort
        // above leaves the ledger and `state.sources` in agreement.
        for outcome in &outcomes {
            self.record_pages(&outcome.query, &outcome.pages);
        }
        for outcome in outcomes {
            let analysis = &outcome.analysis;
            state.append_findings(&format!(
                "\n\n## Analysis for: {}\n\n{}\n\n",
                analysis.query, analysis.analysis
            ));
            state.sources.extend(outcome.records);
            state.analyses.push(outcome.analysis);
        }
        state.current_depth += 1;
        self.think(
            state,
            &format!(
                "Completed search pass {} of {} ({} sources so far)",
                state.current_depth,
                state.depth,
                state.fetched_urls().len()
            ),
        );
    }

    /// Search, fetch, record and analyze one sub-query.
    async fn process_subquery(&self, query: &str, main_query: &str, date: &str) -> SubQueryOutcome {
        let results = self.search.search(query, &self.engines).await;
        let mut seen = HashSet::new();
        let relevant: Vec<&SearchResult> = results
            .iter()
            .filter(|r| is_relevant_url(&r.url) && seen.insert(r.url.clone()))
            .collect();
        let urls: Vec<String> = relevant
            .iter()
            .take(self.config.max_urls_per_query)
            .map(|r| r.url.clone())
            .collect();
        debug!(
            query,
            results = results.len(),
            relevant = relevant.len(),
            fetching = urls.len(),
            "Sub-query search done"
        );

        let mut pages = self.fetcher.fetch_many(&urls, self.dynamic).await;
        // A cache hit carries the URL the page was first stored under.
        for (page, url) in pages.iter_mut().zip(&urls) {
            page.url.clone_from(url);
        }
        pages.retain(ScrapedContent::is_successful);
        let fetched: Vec<&ScrapedContent> = pages.iter().collect();

        let records = relevant
            .iter()
            .map(|r| SourceRecord {
                url: r.url.clone(),
                title: r.title.clone(),
                snippet: r.snippet.clone(),
                engine: r.engine,
                query: query.to_string(),
                fetched: fetched.iter().any(|p| p.url == r.url),
            })
            .collect();

        let analysis = self.analyze(query, main_query, date, &fetched, &relevant).await;
        if let Some(ref cb) = self.callback {
            cb.on_sub_query_complete(query, fetched.len());
        }
        let analysis = QueryAnalysis {
            query: query.to_string(),
            sources: fetched.iter().map(|p| p.url.clone()).collect(),
            analysis,
        };
        SubQueryOutcome {
            query: query.to_string(),
            records,
            pages,
            analysis,
        }
    }

    fn record_pages(&self, query: &str, pages: &[ScrapedContent]) {
        let reliabilities: Vec<f64> = pages
            .iter()
            .map(|p| self.fetcher.reliability(&p.domain()))
            .collect();
        let mut ledger = self.lock_ledger();
        for (page, reliability) in pages.iter().zip(reliabilities) {
            ledger.add_source(SourceInfo::from_scraped(page, reliability));
            ledger.register_citation_with_context(&page.url, query);
            let learnings = ledger.extract_learnings_from_text(&page.text, &page.url, query);
            debug!(url = %page.url, learnings = learnings.len(), "Recorded source");
        }
    }

    async fn analyze(
        &self,
        query: &str,
        main_query: &str,
        date: &str,
        pages: &[&ScrapedContent],
        results: &[&SearchResult],
    ) -> String {
        let content = if !pages.is_empty() {
            pages
                .iter()
                .map(|p| {
                    format!(
                        "Source: {}\nTitle: {}\n\n{}",
                        p.url,
                        p.display_title(),
                        prompts::head(&p.text, ANALYSIS_CHARS_PER_SOURCE)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n---\n\n")
        } else {
            results
                .iter()
                .map(|r| r.to_markdown())
                .collect::<Vec<_>>()
                .join("\n")
        };
        if content.is_empty() {
            return format!("No sources were found for \"{query}\".");
        }

        self.with_fallback(
            "analysis",
            prompts::analysis(query, main_query, &content, date),
            prompts::analysis_simple(query, &content),
            |text| non_empty(text).map(str::to_string),
            || default_analysis(pages, results),
        )
        .await
    }

    /// Continue iff depth remains, no cancellation and under the ceiling.
    fn should_continue(&self, state: &mut ResearchState) -> bool {
        if self.cancellation.is_cancelled() {
            self.mark_cancelled(state, "Stop requested; finishing after this pass");
            return false;
        }
        if state.iterations >= self.config.max_iterations {
            warn!(
                iterations = state.iterations,
                max_iterations = self.config.max_iterations,
                "Iteration ceiling reached"
            );
            return false;
        }
        state.current_depth < state.depth
    }

    async fn reflect(&self, state: &mut ResearchState) {
        let query = state.query.clone();
        let findings = prompts::tail(&state.findings, FINDINGS_TAIL_CHARS).to_string();
        let short = prompts::tail(&state.findings, 2000).to_string();
        let reflection = self
            .with_fallback(
                "reflect",
                prompts::reflection(&query, &findings, &state.current_date),
                prompts::reflection_simple(&query, &short),
                |text| non_empty(text).map(|t| Reflection::parse(t, &query).to_markdown()),
                || MINIMAL_REFLECTION.to_string(),
            )
            .await;
        state.append_findings(&format!(
            "\n\n## Reflection on Current Findings\n\n{}\n\n",
            reflection.trim_end()
        ));
        self.think(state, "Completed reflection on current findings");
    }

    async fn select_sources(&self, state: &mut ResearchState) {
        let urls = state.fetched_urls();
        let limit = self.config.source_selection_limit;
        if urls.len() <= limit {
            state.selected_sources = urls;
        } else {
            let listing = state
                .sources
                .iter()
                .filter(|s| s.fetched)
                .map(|s| format!("- {} ({})", s.url, s.title))
                .collect::<Vec<_>>()
                .join("\n");
            let query = state.query.clone();
            let candidates = urls.clone();
            state.selected_sources = self
                .with_fallback(
                    "select_sources",
                    prompts::source_selection(&query, &listing, FALLBACK_SELECTION),
                    prompts::source_selection_simple(&query, &listing),
                    |text| {
                        let chosen = select_urls(text, &candidates);
                        if chosen.is_empty() { None } else { Some(chosen) }
                    },
                    || urls.iter().take(FALLBACK_SELECTION).cloned().collect(),
                )
                .await;
        }
        self.think(
            state,
            &format!("Selected {} sources for the report", state.selected_sources.len()),
        );
    }

    fn format_citations(&self, state: &mut ResearchState) {
        let titles: BTreeMap<&str, &str> = state
            .sources
            .iter()
            .filter(|s| !s.title.is_empty())
            .map(|s| (s.url.as_str(), s.title.as_str()))
            .collect();

        let mut ledger = self.lock_ledger();
        let mut entries = Vec::with_capacity(state.selected_sources.len());
        for url in &state.selected_sources {
            let id = ledger.register_citation(url);
            let known_title = ledger.source(url).map(|s| !s.title.is_empty()).unwrap_or(false);
            if !known_title && let Some(title) = titles.get(url.as_str()) {
                let metadata = BTreeMap::from([("title".to_string(), (*title).to_string())]);
                if let Err(e) = ledger.update_citation_metadata(id, metadata) {
                    warn!(id, error = %e, "Could not attach citation metadata");
                }
            }
            entries.push(ledger.bibliography_entry(id));
        }
        state.formatted_citations =
            crate::citation::format_bibliography(&entries, self.config.citation_style);
        drop(ledger);
        self.think(state, &format!("Formatted {} citations", entries.len()));
    }

    async fn synthesize(&self, state: &mut ResearchState) {
        let query = state.query.clone();
        let date = state.current_date.clone();
        let max_id = self.lock_ledger().max_citation_id();
        let findings = prompts::tail(&state.findings, REPORT_FINDINGS_CHARS).to_string();

        let initial = self
            .with_fallback(
                "initial_report",
                prompts::initial_report(&query, &findings, &state.formatted_citations, max_id, &date),
                prompts::initial_report_simple(&query, prompts::tail(&findings, 4000)),
                |text| non_empty(text).map(|t| Some(t.to_string())),
                || None,
            )
            .await;
        let Some(initial) = initial else {
            self.think(state, "Report generation failed; using a findings summary");
            return;
        };
        state.initial_report = Some(initial.clone());

        let enhanced = self
            .with_fallback(
                "enhance_report",
                prompts::enhance_report(&query, &initial, max_id),
                prompts::enhance_report_simple(&initial),
                |text| non_empty(text).map(str::to_string),
                || initial.clone(),
            )
            .await;
        state.enhanced_report = Some(enhanced.clone());

        let expanded = self
            .with_fallback(
                "expand_report",
                prompts::expand_report(&query, &enhanced, &findings, max_id),
                prompts::expand_report_simple(&enhanced),
                |text| non_empty(text).map(str::to_string),
                || enhanced.clone(),
            )
            .await;
        state.final_report = Some(expanded);
        self.think(state, "Synthesized final report");
    }

    /// Pick the best available report and clean its citations. Never calls
    /// the model.
    fn finalize(&self, state: &mut ResearchState) {
        if state.findings.trim().is_empty() {
            state.findings = format!("No findings were gathered for: {}\n", state.query);
        }
        let draft = state
            .final_report
            .clone()
            .or_else(|| state.enhanced_report.clone())
            .or_else(|| state.initial_report.clone())
            .unwrap_or_else(|| fallback_report(state));

        let style = self.config.citation_style;
        let ledger = self.lock_ledger();
        let (mut report, validation) = ledger.sanitize_citations(&draft);
        if !validation.valid {
            info!(
                invalid = ?validation.invalid_ids,
                max_valid_id = validation.max_valid_id,
                "Replaced invalid citation markers"
            );
        }
        if !has_references_section(&report) {
            // `report` is sanitized, so every marker left in it is registered.
            let bibliography = if !ledger.validate_citations(&report).used_ids.is_empty() {
                ledger.bibliography_for_text(&report, style)
            } else if !state.selected_sources.is_empty() {
                state.formatted_citations.clone()
            } else {
                String::new()
            };
            if !bibliography.trim().is_empty() {
                report = format!("{}\n\n{}", report.trim_end(), bibliography.trim_start());
            }
        }
        drop(ledger);
        state.final_report = Some(report);
        self.think(state, "Finalized report");
    }

    fn build_result(&self, state: ResearchState, elapsed_secs: f64) -> ResearchResult {
        let citation_stats = self.lock_ledger().get_learning_statistics();
        let research_stats = ResearchStats {
            elapsed_secs,
            sources_found: state.source_urls().len(),
            fetched_sources: state.fetched_urls().len(),
            subqueries: state.subqueries.len(),
            depth_reached: state.current_depth,
            iterations: state.iterations,
            breadth: state.breadth,
        };
        ResearchResult {
            id: Uuid::new_v4(),
            report: state.final_report.unwrap_or_default(),
            query: state.query,
            findings: state.findings,
            sources: state.sources,
            selected_sources: state.selected_sources,
            subqueries: state.subqueries,
            depth: state.depth,
            breadth: state.breadth,
            interrupted: state.interrupted,
            status: state.status,
            chain_of_thought: state.chain_of_thought,
            research_stats,
            citation_stats,
            timestamp: chrono::Utc::now(),
        }
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn default_analysis(pages: &[&ScrapedContent], results: &[&SearchResult]) -> String {
    let mut out = String::from("Sources consulted:\n");
    if pages.is_empty() {
        for r in results {
            out.push_str(&format!("- {} ({}): {}\n", r.title, r.url, r.snippet));
        }
    } else {
        for p in pages {
            let preview = prompts::head(&p.text, 200);
            out.push_str(&format!("- {} ({}): {}\n", p.display_title(), p.url, preview));
        }
    }
    out
}

/// Report assembled from per-query analyses when synthesis produced nothing.
fn fallback_report(state: &ResearchState) -> String {
    let mut out = format!("# Research Report: {}\n\n", state.query);
    if state.analyses.is_empty() {
        out.push_str("## Findings\n\n");
        out.push_str(state.findings.trim());
        out.push('\n');
        return out;
    }
    out.push_str("## Summary of Findings\n\n");
    for analysis in &state.analyses {
        out.push_str(&format!("### {}\n\n{}\n\n", analysis.query, analysis.analysis.trim()));
    }
    out
}

fn has_references_section(report: &str) -> bool {
    report.lines().any(|line| {
        let line = line.trim().to_lowercase();
        line.starts_with('#')
            && ["references", "sources", "bibliography", "works cited"]
                .iter()
                .any(|h| line.trim_start_matches('#').trim() == *h)
    })
}
