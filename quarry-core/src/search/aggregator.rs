use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::backend::{HttpSearchBackend, SearchBackend};
use super::merge::{merge_results, normalize_query};
use super::{MergeStrategy, SearchEngine, SearchResult};
use crate::cache::{SourceCache, cache_key};
use crate::config::SearchConfig;
use crate::error::SearchError;

/// Per-call knobs for [`SearchAggregator::search_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: usize,
    pub strategy: MergeStrategy,
}

/// Queries several engines concurrently and merges the results.
///
/// A failing engine contributes nothing; it never fails the whole search.
pub struct SearchAggregator {
    backend: Arc<dyn SearchBackend>,
    cache: Arc<SourceCache>,
    semaphore: Arc<Semaphore>,
    config: SearchConfig,
}

impl SearchAggregator {
    pub fn new(backend: Arc<dyn SearchBackend>, cache: Arc<SourceCache>, config: SearchConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            backend,
            cache,
            semaphore,
            config,
        }
    }

    /// Aggregator over the live HTTP backend.
    pub fn from_config(config: &SearchConfig, cache: Arc<SourceCache>) -> Result<Self, SearchError> {
        let backend = HttpSearchBackend::new(config.request_timeout(), config.user_agent.clone())?;
        Ok(Self::new(Arc::new(backend), cache, config.clone()))
    }

    pub fn default_options(&self) -> SearchOptions {
        SearchOptions {
            max_results: self.config.max_results,
            strategy: self.config.merge_strategy,
        }
    }

    pub fn default_engines(&self) -> &[SearchEngine] {
        &self.config.engines
    }

    /// Search with the configured result limit and merge strategy.
    pub async fn search(&self, query: &str, engines: &[SearchEngine]) -> Vec<SearchResult> {
        self.search_with(query, engines, &self.default_options()).await
    }

    /// Search `engines` (the configured defaults when empty) and merge.
    pub async fn search_with(
        &self,
        query: &str,
        engines: &[SearchEngine],
        options: &SearchOptions,
    ) -> Vec<SearchResult> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let engines: Vec<SearchEngine> = if engines.is_empty() {
            self.config.engines.clone()
        } else {
            let mut unique = Vec::new();
            for e in engines {
                if !unique.contains(e) {
                    unique.push(*e);
                }
            }
            unique
        };

        let per_engine_limit = options.max_results.max(1);
        let futures = engines
            .iter()
            .map(|engine| self.search_engine(*engine, query, per_engine_limit));
        let lists = join_all(futures).await;

        let total: usize = lists.iter().map(Vec::len).sum();
        let merged = merge_results(lists, options.strategy, query, options.max_results);
        info!(
            query,
            engines = engines.len(),
            raw = total,
            merged = merged.len(),
            "Search complete"
        );
        merged
    }

    /// One engine: cache, then retried requests. Empty on failure.
    async fn search_engine(&self, engine: SearchEngine, query: &str, limit: usize) -> Vec<SearchResult> {
        let key = cache_key(&["search", engine.as_str(), &normalize_query(query)]);
        if let Some(cached) = self.cache.get::<Vec<SearchResult>>(&key) {
            debug!(engine = %engine, query, count = cached.len(), "Search cache hit");
            return cached;
        }

        let attempts = self.config.retry_attempts.max(1);
        for attempt in 0..attempts {
            let outcome = match self.request(engine, query, limit).await {
                Some(outcome) => outcome,
                None => return Vec::new(),
            };
            match outcome {
                Ok(results) => {
                    if !results.is_empty() {
                        self.cache.put_best_effort(&key, &results);
                    }
                    return results;
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let backoff_ms = self.config.backoff_base_ms.saturating_mul(1u64 << attempt.min(10));
                    info!(
                        engine = %engine,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        backoff_ms,
                        error = %e,
                        "Retrying search after transient error"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => {
                    warn!(engine = %engine, query, error = %e, "Search engine failed");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// A single attempt under the concurrency bound. `None` if the semaphore
    /// has been closed.
    async fn request(
        &self,
        engine: SearchEngine,
        query: &str,
        limit: usize,
    ) -> Option<Result<Vec<SearchResult>, SearchError>> {
        let _permit = self.semaphore.acquire().await.ok()?;

        let jitter_ms = jitter(self.config.jitter_ms);
        if jitter_ms > 0 {
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
        }

        let timeout = self.config.request_timeout();
        let result = tokio::time::timeout(timeout, self.backend.query(engine, query, limit))
            .await
            .unwrap_or_else(|_| {
                Err(SearchError::Timeout {
                    engine: engine.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            });
        Some(result)
    }
}

fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_ms)
}
