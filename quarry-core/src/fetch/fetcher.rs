use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::extract::{Extracted, extract, extract_plain};
use super::metrics::{DomainMetrics, DomainStats};
use super::render::PageRenderer;
use super::robots::RobotsPolicy;
use super::transport::{HttpTransport, ReqwestTransport};
use super::{ScrapedContent, detect_human_challenge, domain_of, page_cache_key, validate_url};
use crate::cache::SourceCache;
use crate::config::FetchConfig;
use crate::error::FetchError;

const RETRY_BACKOFF_BASE_MS: u64 = 500;

/// Options for a single fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Try the headless renderer first.
    pub dynamic: bool,
    /// Skip the cache lookup (the result is still written back).
    pub force_refresh: bool,
}

/// Fetches pages with caching, robots checks, adaptive timeouts and a
/// concurrency bound. Never returns an error; see [`ScrapedContent::error`].
pub struct WebFetcher {
    transport: Arc<dyn HttpTransport>,
    renderer: Option<Arc<dyn PageRenderer>>,
    cache: Arc<SourceCache>,
    robots: RobotsPolicy,
    metrics: DomainMetrics,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    config: FetchConfig,
}

/// Removes a URL from the in-flight set when the fetch ends or is dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

impl WebFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<SourceCache>, config: FetchConfig) -> Self {
        let robots = RobotsPolicy::new(
            transport.clone(),
            Duration::from_secs(config.robots_ttl_secs),
        );
        let metrics = DomainMetrics::new(
            Duration::from_secs(config.default_timeout_secs),
            Duration::from_secs(config.min_timeout_secs),
            Duration::from_secs(config.max_timeout_secs),
        );
        Self {
            transport,
            renderer: None,
            cache,
            robots,
            metrics,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            in_flight: Mutex::new(HashSet::new()),
            config,
        }
    }

    /// Fetcher over the live reqwest transport.
    pub fn from_config(config: &FetchConfig, cache: Arc<SourceCache>) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), cache, config.clone()))
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent.max(1)
    }

    /// Per-domain latency and reliability history.
    pub fn domain_stats(&self) -> HashMap<String, DomainStats> {
        self.metrics.snapshot()
    }

    /// Reliability score in `[0, 1]` for `domain` (0.5 when unseen).
    pub fn reliability(&self, domain: &str) -> f64 {
        self.metrics.reliability(domain)
    }

    /// Timeout the next request to `domain` would get.
    pub fn timeout_for(&self, domain: &str) -> Duration {
        self.metrics.timeout_for(domain)
    }

    pub async fn fetch(&self, url: &str, dynamic: bool, force_refresh: bool) -> ScrapedContent {
        self.fetch_with(
            url,
            FetchRequest {
                dynamic,
                force_refresh,
            },
        )
        .await
    }

    pub async fn fetch_with(&self, url: &str, request: FetchRequest) -> ScrapedContent {
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let parsed = match validate_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(url, error = %e, "Rejected URL");
                return ScrapedContent::failed(url, &e, 0);
            }
        };

        let key = page_cache_key(&parsed);
        if !request.force_refresh
            && let Some(cached) = self.cache.get::<ScrapedContent>(&key)
        {
            debug!(url, "Page cache hit");
            return cached;
        }

        let Some(_guard) = self.claim(&parsed) else {
            let e = FetchError::AlreadyInFlight {
                url: url.to_string(),
            };
            debug!(url, "Duplicate fetch rejected");
            return ScrapedContent::failed(url, &e, 0);
        };

        if self.config.respect_robots && !self.robots.is_allowed(&parsed).await {
            let e = FetchError::RobotsDisallowed {
                url: url.to_string(),
            };
            return ScrapedContent::failed(url, &e, elapsed_ms());
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            let e = FetchError::Connection {
                url: url.to_string(),
                message: "fetcher is shutting down".to_string(),
            };
            return ScrapedContent::failed(url, &e, elapsed_ms());
        };

        let domain = domain_of(url).unwrap_or_default();
        let timeout = self.metrics.timeout_for(&domain);
        let attempts = self.config.max_retries + 1;

        for attempt in 0..attempts {
            let attempt_started = Instant::now();
            match self.fetch_once(url, &domain, request.dynamic, timeout).await {
                Ok(mut content) => {
                    self.metrics.record_success(&domain, attempt_started.elapsed());
                    content.fetch_duration_ms = elapsed_ms();
                    self.cache.put_best_effort(&key, &content);
                    info!(
                        url,
                        elapsed_ms = content.fetch_duration_ms,
                        chars = content.text.len(),
                        "Fetched page"
                    );
                    return content;
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let backoff_ms = RETRY_BACKOFF_BASE_MS * (1u64 << attempt.min(6));
                    info!(
                        url,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        backoff_ms,
                        error = %e,
                        "Retrying fetch after transient error"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => {
                    self.metrics.record_failure(&domain, &e.to_string());
                    warn!(url, error = %e, "Fetch failed");
                    return ScrapedContent::failed(url, &e, elapsed_ms());
                }
            }
        }

        // Only reachable with zero attempts, which `max_retries + 1` rules out.
        let e = FetchError::Connection {
            url: url.to_string(),
            message: "no attempts made".to_string(),
        };
        ScrapedContent::failed(url, &e, elapsed_ms())
    }

    /// Fetch `urls` concurrently under one overall deadline. Output order
    /// matches input order; items that miss the deadline become errors.
    pub async fn fetch_many(&self, urls: &[String], dynamic: bool) -> Vec<ScrapedContent> {
        let started = Instant::now();
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.batch_timeout_secs);

        let mut unique: Vec<&str> = Vec::new();
        for url in urls {
            if !unique.contains(&url.as_str()) {
                unique.push(url);
            }
        }

        let futures = unique.iter().map(|url| async move {
            let request = FetchRequest {
                dynamic,
                force_refresh: false,
            };
            match tokio::time::timeout_at(deadline, self.fetch_with(url, request)).await {
                Ok(content) => content,
                Err(_) => {
                    let e = FetchError::BatchTimeout {
                        url: url.to_string(),
                    };
                    warn!(url = *url, "Fetch missed batch deadline");
                    if let Some(domain) = domain_of(url) {
                        self.metrics.record_failure(&domain, &e.to_string());
                    }
                    ScrapedContent::failed(*url, &e, started.elapsed().as_millis() as u64)
                }
            }
        });
        let results = join_all(futures).await;

        let by_url: HashMap<&str, ScrapedContent> = unique.into_iter().zip(results).collect();
        let ordered: Vec<ScrapedContent> = urls
            .iter()
            .filter_map(|u| by_url.get(u.as_str()).cloned())
            .collect();

        let ok = ordered.iter().filter(|c| c.is_successful()).count();
        info!(
            requested = urls.len(),
            succeeded = ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch fetch complete"
        );
        ordered
    }

    fn claim(&self, url: &Url) -> Option<InFlightGuard<'_>> {
        let mut key = url.clone();
        key.set_fragment(None);
        let key = key.to_string();
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            key,
        })
    }

    fn dynamic_denied(&self, domain: &str) -> bool {
        self.config
            .dynamic_denylist
            .iter()
            .any(|d| domain == d || domain.ends_with(&format!(".{d}")))
    }

    async fn fetch_once(
        &self,
        url: &str,
        domain: &str,
        dynamic: bool,
        timeout: Duration,
    ) -> Result<ScrapedContent, FetchError> {
        if dynamic
            && !self.dynamic_denied(domain)
            && let Some(renderer) = &self.renderer
        {
            match renderer.render(url, timeout).await {
                Ok(html) => return self.build(url, url, "text/html", html),
                Err(e) => {
                    warn!(url, error = %e, "Dynamic render failed, falling back to static fetch");
                }
            }
        }

        let response = self.transport.get(url, timeout).await?;
        if !response.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: response.status,
            });
        }

        let content_type = response
            .content_type
            .as_deref()
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        let supported = content_type.contains("html")
            || content_type.contains("xml")
            || content_type.starts_with("text/");
        if !supported {
            return Err(FetchError::UnsupportedContent {
                url: url.to_string(),
                content_type,
            });
        }

        if let Some(reason) = detect_human_challenge(&response.final_url, &response.body) {
            return Err(FetchError::Challenge {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }

        self.build(url, &response.final_url, &content_type, response.body)
    }

    fn build(
        &self,
        url: &str,
        final_url: &str,
        content_type: &str,
        body: String,
    ) -> Result<ScrapedContent, FetchError> {
        let max_chars = self.config.max_text_chars;
        let extracted = if content_type.starts_with("text/plain") {
            extract_plain(&body, final_url, max_chars)
        } else {
            extract(&body, final_url, max_chars)
        };
        let Some(Extracted {
            title,
            text,
            method,
            metadata,
        }) = extracted
        else {
            return Err(FetchError::EmptyContent {
                url: url.to_string(),
            });
        };

        Ok(ScrapedContent {
            url: url.to_string(),
            title,
            text,
            html: body,
            content_type: content_type.to_string(),
            metadata,
            error: None,
            fetch_duration_ms: 0,
            extraction: Some(method),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ExtractionMethod, HttpResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct MockPage {
        status: u16,
        body: String,
        content_type: &'static str,
        delay: Duration,
    }

    fn page(body: &str) -> MockPage {
        MockPage {
            status: 200,
            body: body.to_string(),
            content_type: "text/html; charset=utf-8",
            delay: Duration::from_millis(10),
        }
    }

    fn article(topic: &str) -> String {
        format!(
            "<html><head><title>{topic}</title></head><body><article><p>{topic} research shows \
             that modern photovoltaic modules convert roughly a fifth of incoming sunlight into \
             electricity, and laboratory cells keep pushing that figure higher every year.</p>\
             <p>Efficiency depends on temperature, shading, and cell chemistry.</p></article></body></html>"
        )
    }

    #[derive(Default)]
    struct MockTransport {
        pages: HashMap<String, MockPage>,
        transient_failures: Mutex<HashMap<String, usize>>,
        requests: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        fn with_page(mut self, url: &str, page: MockPage) -> Self {
            self.pages.insert(url.to_string(), page);
            self
        }

        fn page_requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, FetchError> {
            if url.ends_with("/robots.txt") {
                return match self.pages.get(url) {
                    Some(p) => Ok(HttpResponse {
                        status: p.status,
                        final_url: url.to_string(),
                        content_type: Some("text/plain".into()),
                        body: p.body.clone(),
                    }),
                    None => Ok(HttpResponse {
                        status: 404,
                        final_url: url.to_string(),
                        content_type: None,
                        body: String::new(),
                    }),
                };
            }

            self.requests.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let page = self.pages.get(url).cloned();
            let delay = page.as_ref().map(|p| p.delay).unwrap_or_default();
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            {
                let mut failures = self.transient_failures.lock().unwrap();
                if let Some(left) = failures.get_mut(url)
                    && *left > 0
                {
                    *left -= 1;
                    return Err(FetchError::Connection {
                        url: url.to_string(),
                        message: "reset".into(),
                    });
                }
            }

            match page {
                Some(p) => Ok(HttpResponse {
                    status: p.status,
                    final_url: url.to_string(),
                    content_type: Some(p.content_type.to_string()),
                    body: p.body,
                }),
                None => Ok(HttpResponse {
                    status: 404,
                    final_url: url.to_string(),
                    content_type: Some("text/html".into()),
                    body: "not found".into(),
                }),
            }
        }
    }

    struct FailingRenderer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageRenderer for FailingRenderer {
        async fn render(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Render {
                url: url.to_string(),
                message: "no browser".into(),
            })
        }
    }

    fn config() -> FetchConfig {
        FetchConfig {
            respect_robots: false,
            ..Default::default()
        }
    }

    fn fetcher(transport: Arc<MockTransport>, config: FetchConfig) -> WebFetcher {
        WebFetcher::new(
            transport,
            Arc::new(SourceCache::in_memory(Duration::from_secs(3600))),
            config,
        )
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_request() {
        let transport = Arc::new(MockTransport::default());
        let f = fetcher(transport.clone(), config());
        let out = f.fetch("javascript:alert(1)", false, false).await;
        assert!(!out.is_successful());
        assert!(out.error.unwrap().contains("Invalid URL"));
        assert_eq!(transport.page_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_fetch_extracts_and_caches() {
        let url = "https://solar.example.org/efficiency";
        let transport = Arc::new(MockTransport::default().with_page(url, page(&article("Solar"))));
        let f = fetcher(transport.clone(), config());

        let first = f.fetch(url, false, false).await;
        assert!(first.is_successful());
        assert_eq!(first.title, "Solar");
        assert_eq!(first.extraction, Some(ExtractionMethod::Structured));
        assert_eq!(first.metadata.get("domain").unwrap(), "solar.example.org");

        let second = f.fetch(url, false, false).await;
        assert_eq!(second, first);
        assert_eq!(transport.page_requests(), 1);

        f.fetch(url, false, true).await;
        assert_eq!(transport.page_requests(), 2);

        let stats = f.domain_stats();
        assert_eq!(stats["solar.example.org"].successes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_disallow_short_circuits() {
        let url = "https://example.com/private/report";
        let transport = Arc::new(
            MockTransport::default()
                .with_page(url, page(&article("Private")))
                .with_page(
                    "https://example.com/robots.txt",
                    page("User-agent: *\nDisallow: /private\n"),
                ),
        );
        let f = fetcher(
            transport.clone(),
            FetchConfig {
                respect_robots: true,
                ..Default::default()
            },
        );
        let out = f.fetch(url, false, false).await;
        assert!(out.error.unwrap().contains("robots.txt"));
        assert_eq!(transport.page_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_is_tagged_and_recorded() {
        let url = "https://missing.example.com/page";
        let transport = Arc::new(MockTransport::default());
        let f = fetcher(transport, config());
        let out = f.fetch(url, false, false).await;
        assert!(out.error.unwrap().contains("HTTP 404"));
        assert_eq!(f.domain_stats()["missing.example.com"].failures, 1);
        assert!(f.reliability("missing.example.com") < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let url = "https://flaky.example.com/a";
        let transport = Arc::new(MockTransport::default().with_page(url, page(&article("Flaky"))));
        transport
            .transient_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), 1);
        let f = fetcher(transport.clone(), config());

        let out = f.fetch(url, false, false).await;
        assert!(out.is_successful());
        assert_eq!(transport.page_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_content_type() {
        let url = "https://files.example.com/paper.pdf";
        let mut pdf = page("%PDF-1.7");
        pdf.content_type = "application/pdf";
        let transport = Arc::new(MockTransport::default().with_page(url, pdf));
        let f = fetcher(transport, config());
        let out = f.fetch(url, false, false).await;
        assert!(out.error.unwrap().contains("Unsupported content type"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_page_is_failure() {
        let url = "https://walled.example.com/a";
        let transport = Arc::new(MockTransport::default().with_page(
            url,
            page("<html><body><div class=\"g-recaptcha\"></div></body></html>"),
        ));
        let f = fetcher(transport, config());
        let out = f.fetch(url, false, false).await;
        assert!(out.error.unwrap().contains("Human verification"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicate_is_rejected() {
        let url = "https://slow.example.com/a";
        let mut slow = page(&article("Slow"));
        slow.delay = Duration::from_secs(2);
        let transport = Arc::new(MockTransport::default().with_page(url, slow));
        let f = fetcher(transport.clone(), config());

        let (a, b) = tokio::join!(f.fetch(url, false, false), f.fetch(url, false, false));
        assert!(a.is_successful());
        assert!(b.error.unwrap().contains("already in progress"));
        assert_eq!(transport.page_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_failure_falls_back_to_static() {
        let url = "https://spa.example.com/app";
        let transport = Arc::new(MockTransport::default().with_page(url, page(&article("Spa"))));
        let renderer = Arc::new(FailingRenderer {
            calls: AtomicUsize::new(0),
        });
        let f = fetcher(transport.clone(), config()).with_renderer(renderer.clone());

        let out = f.fetch(url, true, false).await;
        assert!(out.is_successful());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.page_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denylisted_domain_skips_renderer() {
        let url = "https://en.wikipedia.org/wiki/Solar_cell";
        let transport = Arc::new(MockTransport::default().with_page(url, page(&article("Wiki"))));
        let renderer = Arc::new(FailingRenderer {
            calls: AtomicUsize::new(0),
        });
        let f = fetcher(transport, config()).with_renderer(renderer.clone());

        assert!(f.fetch(url, true, false).await.is_successful());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_many_bounded_and_ordered() {
        let urls: Vec<String> = (0..10)
            .map(|i| format!("https://site{i}.example.com/page"))
            .collect();
        let mut transport = MockTransport::default();
        for (i, url) in urls.iter().enumerate() {
            if i != 4 {
                let mut p = page(&article(&format!("Topic{i}")));
                p.delay = Duration::from_millis(100);
                transport = transport.with_page(url, p);
            }
        }
        let transport = Arc::new(transport);
        let f = fetcher(
            transport.clone(),
            FetchConfig {
                max_concurrent: 3,
                max_retries: 0,
                ..config()
            },
        );

        let out = f.fetch_many(&urls, false).await;
        assert_eq!(out.len(), 10);
        for (i, (content, url)) in out.iter().zip(&urls).enumerate() {
            assert_eq!(&content.url, url);
            assert_eq!(content.is_successful(), i != 4);
        }
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_many_batch_timeout_keeps_position() {
        let fast = "https://fast.example.com/a".to_string();
        let slow = "https://slow.example.com/b".to_string();
        let mut slow_page = page(&article("Slow"));
        slow_page.delay = Duration::from_secs(600);
        let transport = Arc::new(
            MockTransport::default()
                .with_page(&fast, page(&article("Fast")))
                .with_page(&slow, slow_page),
        );
        let f = fetcher(
            transport,
            FetchConfig {
                batch_timeout_secs: 5,
                max_timeout_secs: 1000,
                default_timeout_secs: 1000,
                ..config()
            },
        );

        let out = f.fetch_many(&[slow.clone(), fast.clone(), slow.clone()], false).await;
        assert_eq!(out.len(), 3);
        assert!(out[0].error.as_deref().unwrap().contains("Batch deadline"));
        assert!(out[1].is_successful());
        assert_eq!(out[2].url, slow);
        assert!(!out[2].is_successful());
    }

    #[test]
    fn test_denylist_matches_subdomains() {
        let f = fetcher(Arc::new(MockTransport::default()), config());
        assert!(f.dynamic_denied("en.wikipedia.org"));
        assert!(f.dynamic_denied("github.com"));
        assert!(!f.dynamic_denied("notgithub.com"));
    }
}
