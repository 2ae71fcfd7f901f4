//! Engine transport: how a single (engine, query) request reaches the network.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::parsers::{
    parse_bing_results, parse_duckduckgo_results, parse_google_results, parse_wikipedia_results,
};
use super::{SearchEngine, SearchResult};
use crate::error::SearchError;
use crate::fetch::detect_human_challenge;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Pick a desktop browser user agent at random.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Performs one request against one engine. Retries, caching and
/// concurrency limits belong to the aggregator, not the backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn query(
        &self,
        engine: SearchEngine,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// Live HTTP backend scraping each engine's public result page.
pub struct HttpSearchBackend {
    client: reqwest::Client,
    user_agent: Option<String>,
    timeout: Duration,
}

impl HttpSearchBackend {
    pub fn new(timeout: Duration, user_agent: Option<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| SearchError::Request {
                engine: "http".to_string(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            user_agent,
            timeout,
        })
    }

    fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string())
    }

    async fn get_text(&self, engine: SearchEngine, url: Url) -> Result<String, SearchError> {
        debug!(engine = %engine, url = %url, "Search request");
        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", self.user_agent())
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout {
                        engine: engine.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    SearchError::Request {
                        engine: engine.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                engine: engine.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| SearchError::Request {
            engine: engine.to_string(),
            message: format!("Failed to read body: {e}"),
        })?;

        if let Some(reason) = detect_human_challenge(&final_url, &body) {
            return Err(SearchError::Blocked {
                engine: engine.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(body)
    }
}

/// Build the request URL for `engine`.
pub(crate) fn engine_url(engine: SearchEngine, query: &str, limit: usize) -> Option<Url> {
    let (base, pairs): (&str, Vec<(&str, String)>) = match engine {
        SearchEngine::Google => (
            "https://www.google.com/search",
            vec![
                ("q", query.to_string()),
                ("num", limit.min(100).to_string()),
                ("hl", "en".to_string()),
            ],
        ),
        SearchEngine::DuckDuckGo => (
            "https://html.duckduckgo.com/html/",
            vec![("q", query.to_string())],
        ),
        SearchEngine::Bing => (
            "https://www.bing.com/search",
            vec![("q", query.to_string()), ("count", limit.min(50).to_string())],
        ),
        SearchEngine::Wikipedia => (
            "https://en.wikipedia.org/w/api.php",
            vec![
                ("action", "opensearch".to_string()),
                ("search", query.to_string()),
                ("limit", limit.clamp(1, 50).to_string()),
                ("namespace", "0".to_string()),
                ("format", "json".to_string()),
            ],
        ),
    };
    let mut url = Url::parse(base).ok()?;
    {
        let mut qp = url.query_pairs_mut();
        for (k, v) in &pairs {
            qp.append_pair(k, v);
        }
    }
    Some(url)
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn query(
        &self,
        engine: SearchEngine,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = engine_url(engine, query, limit).ok_or_else(|| SearchError::Request {
            engine: engine.to_string(),
            message: "could not build request URL".to_string(),
        })?;
        let body = self.get_text(engine, url).await?;

        let results = match engine {
            SearchEngine::Google => parse_google_results(&body, limit),
            SearchEngine::DuckDuckGo => parse_duckduckgo_results(&body, limit),
            SearchEngine::Bing => parse_bing_results(&body, limit),
            SearchEngine::Wikipedia => parse_wikipedia_results(&body, limit)?,
        };
        debug!(engine = %engine, count = results.len(), "Parsed search results");
        Ok(results)
    }
}
