//! Integration tests for the research controller.
//!
//! These drive full runs with a scripted model, an in-process search backend
//! and an in-process HTTP transport; nothing touches the network.

use async_trait::async_trait;
use quarry_core::cache::SourceCache;
use quarry_core::config::{FetchConfig, ResearchConfig, SearchConfig};
use quarry_core::error::{FetchError, SearchError};
use quarry_core::fetch::{HttpResponse, HttpTransport, WebFetcher};
use quarry_core::llm::{LanguageModel, MockLanguageModel};
use quarry_core::research::{
    AiSearchOptions, AiSearcher, ResearchCallback, ResearchCancellation, ResearchController, ResearchStatus,
};
use quarry_core::search::{SearchAggregator, SearchBackend, SearchEngine, SearchResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// --- Test doubles ---

/// Two citable results plus one social-media result per query.
struct StubSearch;

#[async_trait]
impl SearchBackend for StubSearch {
    async fn query(
        &self,
        engine: SearchEngine,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let slug = query.to_lowercase().replace(' ', "-");
        let mut results = vec![
            SearchResult::new(
                format!("https://{slug}.example.org/overview"),
                format!("{query} overview"),
                "An overview.",
                engine,
            ),
            SearchResult::new(
                "https://www.youtube.com/watch?v=abc",
                "Video",
                "A video.",
                engine,
            ),
            SearchResult::new(
                format!("https://{slug}.example.edu/study"),
                format!("{query} study"),
                "A study.",
                engine,
            ),
        ];
        results.truncate(limit);
        Ok(results)
    }
}

/// Serves an article for every URL after `delay`; robots.txt is absent.
/// URLs containing the `slow` marker wait for its duration instead.
struct StubWeb {
    delay: Duration,
    slow: Option<(&'static str, Duration)>,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubWeb {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            slow: None,
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_slow(mut self, marker: &'static str, delay: Duration) -> Self {
        self.slow = Some((marker, delay));
        self
    }
}

#[async_trait]
impl HttpTransport for StubWeb {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, FetchError> {
        if url.ends_with("/robots.txt") {
            return Ok(HttpResponse {
                status: 404,
                final_url: url.to_string(),
                content_type: None,
                body: String::new(),
            });
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = match self.slow {
            Some((marker, slow)) if url.contains(marker) => slow,
            _ => self.delay,
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let body = format!(
            "<html><head><title>Article at {url}</title></head><body><article>\
             <p>The page at {url} reports that commercial silicon modules now convert \
             between twenty and twenty-three percent of sunlight into electricity.</p>\
             <p>Heat reduces output: every degree above twenty-five Celsius costs about \
             half a percent of rated power according to {url}.</p>\
             </article></body></html>"
        );
        Ok(HttpResponse {
            status: 200,
            final_url: url.to_string(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            body,
        })
    }
}

fn scripted_model() -> MockLanguageModel {
    MockLanguageModel::new().with_responder(|prompt| {
        let reply = if prompt.contains("expert research planner") {
            "## Objectives\n- Quantify panel efficiency\n\n## Key Areas to Investigate\n\
             - Cell chemistry\n- Temperature effects\n\n## Methodology\nCompare studies.\n\n\
             ## Expected Outcomes\n- Efficiency ranges"
        } else if prompt.contains("generating web search queries") {
            "Here are the queries:\n1. photovoltaic cell efficiency\n2. panel temperature losses\n\
             3. inverter conversion losses"
        } else if prompt.contains("analyzing sources") {
            "Commercial modules reach 20-23% efficiency [1]; heat lowers output [2]."
        } else if prompt.contains("Reflect on the research") {
            "## Key Insights\n- Efficiency is near 22%\n\n## Knowledge Gaps\n- Degradation\n\n\
             ## Next Steps\n- Study degradation\n\n## Overall Reflection\nSolid progress."
        } else if prompt.contains("Write a comprehensive research report") {
            "# Solar Panel Efficiency\n\nModules reach 22% [1]. Heat matters [2]."
        } else if prompt.contains("Improve the following research report") {
            "# Solar Panel Efficiency\n\nModern modules reach about 22% [1]. Heat costs output [2]."
        } else if prompt.contains("Expand the research report") {
            "# Solar Panel Efficiency\n\n## Summary\n\nModern modules reach about 22% [1]. \
             Heat costs roughly 0.5% per degree [2]. A disputed claim [9]."
        } else {
            return None;
        };
        Some(reply.to_string())
    })
}

struct Harness {
    controller: ResearchController,
    model: Arc<MockLanguageModel>,
    web: Arc<StubWeb>,
}

/// Search and fetch stack over the stubs, each with a fresh in-memory cache.
fn stack(web: Arc<StubWeb>, fetch: FetchConfig) -> (Arc<SearchAggregator>, Arc<WebFetcher>) {
    let search_config = SearchConfig {
        engines: vec![SearchEngine::DuckDuckGo],
        jitter_ms: 0,
        backoff_base_ms: 1,
        ..Default::default()
    };
    let search = SearchAggregator::new(
        Arc::new(StubSearch),
        Arc::new(SourceCache::in_memory(Duration::from_secs(3600))),
        search_config,
    );
    let fetcher = WebFetcher::new(
        web,
        Arc::new(SourceCache::in_memory(Duration::from_secs(3600))),
        fetch,
    );
    (Arc::new(search), Arc::new(fetcher))
}

fn harness(model: MockLanguageModel, web: StubWeb, fetch: FetchConfig, research: ResearchConfig) -> Harness {
    let model = Arc::new(model);
    let web = Arc::new(web);
    let (search, fetcher) = stack(web.clone(), fetch);
    let controller = ResearchController::new(
        model.clone() as Arc<dyn LanguageModel>,
        search,
        fetcher,
        research,
    );
    Harness {
        controller,
        model,
        web,
    }
}

fn fetch_config() -> FetchConfig {
    FetchConfig {
        max_retries: 0,
        ..Default::default()
    }
}

/// Requests cancellation `times` times when a trigger fires.
struct CancelOn {
    cancellation: ResearchCancellation,
    times: usize,
    on_queries: bool,
    fired: AtomicUsize,
}

impl CancelOn {
    fn fire(&self) {
        if self.fired.fetch_add(1, Ordering::SeqCst) == 0 {
            for _ in 0..self.times {
                self.cancellation.request();
            }
        }
    }
}

impl ResearchCallback for CancelOn {
    fn on_status_change(&self, _status: ResearchStatus, _progress: f32) {}
    fn on_queries_generated(&self, _queries: &[String]) {
        if self.on_queries {
            self.fire();
        }
    }
    fn on_sub_query_complete(&self, _query: &str, _sources_found: usize) {
        if !self.on_queries {
            self.fire();
        }
    }
    fn on_thought(&self, _thought: &str) {}
}

// --- Tests ---

#[tokio::test(start_paused = true)]
async fn test_end_to_end_solar_panel_efficiency() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_millis(20)),
        fetch_config(),
        ResearchConfig::default(),
    );

    let result = h
        .controller
        .run("solar panel efficiency", 1, 2)
        .await
        .unwrap();

    assert_eq!(result.subqueries, vec!["photovoltaic cell efficiency", "panel temperature losses"]);
    assert_eq!(result.research_stats.depth_reached, 1);
    assert_eq!(result.research_stats.iterations, 1);
    assert!(!result.interrupted);
    assert_eq!(result.status, ResearchStatus::Complete);

    // Two relevant URLs per sub-query; the video link is filtered out.
    assert_eq!(result.research_stats.fetched_sources, 4);
    assert_eq!(h.web.requests.load(Ordering::SeqCst), 4);
    assert!(result.sources.iter().all(|s| !s.url.contains("youtube")));

    assert!(result.findings.starts_with("# Research Plan\n\n## Objectives\n\n- Quantify panel efficiency"));
    assert!(result.findings.contains("## Analysis for: photovoltaic cell efficiency"));
    assert!(result.findings.contains("## Analysis for: panel temperature losses"));

    // The unknown [9] is neutralized and a reference list is appended.
    assert!(result.report.contains("about 22% [1]"));
    assert!(result.report.contains("A disputed claim [?]."));
    assert!(result.report.contains("# References"));
    assert!(result.report.contains("[1] Article at"));
    assert!(!result.report.contains("[9]"));

    let ledger = h.controller.ledger();
    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.citation_count(), 4);
    assert_eq!(result.citation_stats.total_sources, 4);
    assert!(result.citation_stats.total_learnings > 0);

    // Depth 1 never reflects.
    assert!(!h.model.prompts().iter().any(|p| p.contains("Reflect on the research")));
}

#[tokio::test(start_paused = true)]
async fn test_reflects_between_passes() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_millis(5)),
        fetch_config(),
        ResearchConfig::default(),
    );

    let result = h.controller.run("solar panel efficiency", 2, 2).await.unwrap();

    assert_eq!(result.research_stats.depth_reached, 2);
    assert!(result.findings.contains("## Reflection on Current Findings"));
    assert!(result.findings.contains("- Efficiency is near 22%"));
    // Already explored queries are not repeated; the third line fills in.
    assert_eq!(result.subqueries.len(), 3);
    assert_eq!(result.subqueries[2], "inverter conversion losses");
}

#[tokio::test(start_paused = true)]
async fn test_terminates_when_model_is_dead() {
    let h = harness(
        MockLanguageModel::failing(),
        StubWeb::new(Duration::from_millis(5)),
        fetch_config(),
        ResearchConfig::default(),
    );

    let result = h.controller.run("tidal energy", 3, 2).await.unwrap();

    // The query itself stands in for generated sub-queries.
    assert!(result.research_stats.iterations <= 4);
    assert_eq!(result.research_stats.depth_reached, 3);
    assert_eq!(result.subqueries, vec!["tidal energy"; 3]);
    assert!(result.findings.contains("Research plan for: tidal energy"));
    assert!(result.report.starts_with("# Research Report: tidal energy"));
    assert!(result.report.contains("# References"));
    assert!(!result.findings.trim().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_iteration_ceiling_caps_depth() {
    let research = ResearchConfig {
        max_iterations: 2,
        ..Default::default()
    };
    let h = harness(
        MockLanguageModel::failing(),
        StubWeb::new(Duration::from_millis(5)),
        fetch_config(),
        research,
    );

    let result = h.controller.run("tidal energy", 5, 1).await.unwrap();
    assert_eq!(result.research_stats.iterations, 2);
    assert_eq!(result.research_stats.depth_reached, 2);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_cancel_finishes_pass_then_reports() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_millis(5)),
        fetch_config(),
        ResearchConfig::default(),
    );
    let cancellation = h.controller.cancellation();
    let controller = h.controller.with_callback(Arc::new(CancelOn {
        cancellation,
        times: 1,
        on_queries: false,
        fired: AtomicUsize::new(0),
    }));

    let result = controller.run("solar panel efficiency", 3, 2).await.unwrap();

    assert!(result.interrupted);
    assert_eq!(result.research_stats.iterations, 1);
    assert_eq!(result.research_stats.depth_reached, 1);
    assert!(h.model.prompts().iter().any(|p| p.contains("Write a comprehensive research report")));
    assert!(result.report.contains("Modern modules reach about 22% [1]"));
    assert_eq!(result.status, ResearchStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_cancel_after_queries_still_searches_them() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_millis(5)),
        fetch_config(),
        ResearchConfig::default(),
    );
    let cancellation = h.controller.cancellation();
    let controller = h.controller.with_callback(Arc::new(CancelOn {
        cancellation,
        times: 1,
        on_queries: true,
        fired: AtomicUsize::new(0),
    }));

    let result = controller.run("solar panel efficiency", 3, 2).await.unwrap();

    assert!(result.interrupted);
    assert_eq!(result.status, ResearchStatus::Complete);
    assert_eq!(result.research_stats.iterations, 1);
    assert_eq!(result.research_stats.depth_reached, 1);
    assert_eq!(result.research_stats.fetched_sources, 4);
    assert!(result.findings.contains("## Analysis for: photovoltaic cell efficiency"));
    assert!(!h.model.prompts().iter().any(|p| p.contains("Reflect on the research")));
    assert!(result.report.contains("# References"));
}

#[tokio::test(start_paused = true)]
async fn test_abort_skips_search_and_synthesis() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_millis(5)),
        fetch_config(),
        ResearchConfig::default(),
    );
    let cancellation = h.controller.cancellation();
    let controller = h.controller.with_callback(Arc::new(CancelOn {
        cancellation,
        times: 2,
        on_queries: true,
        fired: AtomicUsize::new(0),
    }));

    let result = controller.run("solar panel efficiency", 3, 2).await.unwrap();

    assert!(result.interrupted);
    assert_eq!(result.research_stats.iterations, 0);
    assert_eq!(h.web.requests.load(Ordering::SeqCst), 0);
    assert!(!h.model.prompts().iter().any(|p| p.contains("Write a comprehensive research report")));
    assert!(result.findings.contains("# Research Plan"));
    assert!(!result.report.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_in_flight_fetches() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_secs(10)),
        fetch_config(),
        ResearchConfig::default(),
    );
    let cancellation = h.controller.cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancellation.request();
        cancellation.request();
    });

    let result = h.controller.run("solar panel efficiency", 2, 2).await.unwrap();

    assert!(result.interrupted);
    assert_eq!(result.research_stats.iterations, 1);
    assert_eq!(result.research_stats.depth_reached, 0);
    assert_eq!(result.research_stats.fetched_sources, 0);
    assert!(!result.findings.is_empty());
    assert_eq!(result.status, ResearchStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_abort_mid_pass_leaves_ledger_matching_sources() {
    // The first sub-query finishes quickly; the second hangs on its fetches.
    let web = StubWeb::new(Duration::from_millis(5)).with_slow("temperature", Duration::from_secs(10));
    let h = harness(scripted_model(), web, fetch_config(), ResearchConfig::default());
    let cancellation = h.controller.cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancellation.request();
        cancellation.request();
    });

    let result = h.controller.run("solar panel efficiency", 2, 2).await.unwrap();

    assert!(result.interrupted);
    assert!(h.web.requests.load(Ordering::SeqCst) >= 2);
    assert_eq!(result.research_stats.fetched_sources, 0);
    assert!(result.sources.is_empty());

    let ledger = h.controller.ledger();
    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.citation_count(), 0);
    assert_eq!(result.citation_stats.total_sources, result.research_stats.fetched_sources);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_concurrency_is_bounded_across_subqueries() {
    let fetch = FetchConfig {
        max_concurrent: 3,
        max_retries: 0,
        ..Default::default()
    };
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::from_millis(50)),
        fetch,
        ResearchConfig::default(),
    );

    let result = h.controller.run("solar panel efficiency", 1, 3).await.unwrap();

    assert_eq!(result.research_stats.fetched_sources, 6);
    assert!(h.web.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert!(h.web.max_in_flight.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let h = harness(
        scripted_model(),
        StubWeb::new(Duration::ZERO),
        fetch_config(),
        ResearchConfig::default(),
    );
    assert!(h.controller.run("   ", 1, 1).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_ai_search_summarizes_with_page_previews() {
    let web = Arc::new(StubWeb::new(Duration::from_millis(5)));
    let (search, fetcher) = stack(web.clone(), fetch_config());
    let model = Arc::new(MockLanguageModel::new().with_responder(|prompt| {
        prompt
            .contains("expert analyst")
            .then(|| "Modules reach 22% [1]; a stray claim [7].".to_string())
    }));
    let searcher = AiSearcher::new(model.clone() as Arc<dyn LanguageModel>, search).with_fetcher(fetcher);

    let result = searcher
        .search("solar panels", &AiSearchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.query, "solar panels");
    assert_eq!(result.summary, "Modules reach 22% [1]; a stray claim [?].");
    assert_eq!(result.sources.len(), 3);

    // The video link is listed but never fetched.
    assert_eq!(web.requests.load(Ordering::SeqCst), 2);
    let video = result.sources.iter().find(|s| s.url.contains("youtube")).unwrap();
    assert!(!video.scraped);
    let study = result.sources.iter().find(|s| s.url.contains("/study")).unwrap();
    assert!(study.scraped);
    assert!(study.snippet.contains("commercial silicon modules"));

    let prompt = &model.prompts()[0];
    assert!(prompt.contains("Provide a concise yet informative summary"));
    assert!(prompt.contains("[1] Solar-panels\nTitle: solar panels overview"));
    assert!(result.to_markdown().contains("## Sources\n\n### 1. solar panels overview"));
}

#[tokio::test(start_paused = true)]
async fn test_ai_search_lists_sources_when_model_is_dead() {
    let web = Arc::new(StubWeb::new(Duration::from_millis(5)));
    let (search, fetcher) = stack(web.clone(), fetch_config());
    let searcher =
        AiSearcher::new(Arc::new(MockLanguageModel::failing()), search).with_fetcher(fetcher);
    let options = AiSearchOptions {
        scrape: false,
        detailed: true,
        ..Default::default()
    };

    let result = searcher.search("tidal energy", &options).await.unwrap();

    assert_eq!(web.requests.load(Ordering::SeqCst), 0);
    assert!(result.summary.starts_with("Top results for \"tidal energy\":"));
    assert!(result.summary.contains("- tidal energy overview [1]: An overview."));
    assert!(result.sources.iter().all(|s| !s.scraped));
    assert!(searcher.search("  ", &options).await.is_err());
}
