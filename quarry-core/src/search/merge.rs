//! Merging per-engine result lists.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use url::Url;

use super::{MergeStrategy, SearchEngine, SearchResult};
use crate::citation::SourceType;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "what", "how", "why", "are", "was", "were", "from", "into", "that",
    "this", "about", "does", "which", "who", "when", "where", "its", "of", "in", "on", "to", "a",
    "an", "is", "vs",
];

/// Lowercase, trim and collapse whitespace. Used for cache keys.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identity of a result URL: fragment dropped, trailing slash ignored.
pub(crate) fn dedup_key(url: &str) -> String {
    let trimmed = url.trim();
    let normalized = match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    };
    normalized.trim_end_matches('/').to_string()
}

/// Concatenate, deduplicate by URL (first occurrence wins), order by
/// `strategy`, and truncate to `max_results`.
pub fn merge_results(
    lists: Vec<Vec<SearchResult>>,
    strategy: MergeStrategy,
    query: &str,
    max_results: usize,
) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let unique: Vec<SearchResult> = lists
        .into_iter()
        .flatten()
        .filter(|r| seen.insert(dedup_key(&r.url)))
        .collect();

    let mut ordered = alternate(unique);
    match strategy {
        MergeStrategy::Alternate => {}
        MergeStrategy::Relevance => rank_by_relevance(&mut ordered, query),
        MergeStrategy::Date => {
            // Stable: undated results keep their alternate order at the end.
            ordered.sort_by(|a, b| match (a.date, b.date) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }
    }
    ordered.truncate(max_results);
    ordered
}

/// Round-robin across engines in order of first appearance, keeping each
/// engine's internal ranking.
fn alternate(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut engine_order: Vec<SearchEngine> = Vec::new();
    let mut by_engine: HashMap<SearchEngine, std::collections::VecDeque<SearchResult>> =
        HashMap::new();
    for r in results {
        if !by_engine.contains_key(&r.engine) {
            engine_order.push(r.engine);
        }
        by_engine.entry(r.engine).or_default().push_back(r);
    }

    let mut out = Vec::new();
    loop {
        let mut progressed = false;
        for engine in &engine_order {
            if let Some(r) = by_engine.get_mut(engine).and_then(|q| q.pop_front()) {
                out.push(r);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

fn trust_bucket(result: &SearchResult) -> u8 {
    match SourceType::classify(&result.domain()) {
        SourceType::Academic => 0,
        SourceType::Encyclopedic => 1,
        SourceType::Official => 2,
        SourceType::News => 3,
        _ => 4,
    }
}

fn keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn relevance_score(result: &SearchResult, keywords: &[String]) -> u32 {
    let title = result.title.to_lowercase();
    let snippet = result.snippet.to_lowercase();
    let mut score = 0;
    for kw in keywords {
        if title.contains(kw.as_str()) {
            score += 2;
        }
        if snippet.contains(kw.as_str()) {
            score += 1;
        }
    }
    if let Some(date) = result.date {
        let age_days = (Utc::now() - date).num_days();
        if age_days <= 30 {
            score += 2;
        } else if age_days <= 365 {
            score += 1;
        }
    }
    score
}

fn rank_by_relevance(results: &mut [SearchResult], query: &str) {
    let kws = keywords(query);
    results.sort_by_cached_key(|r| {
        (
            trust_bucket(r),
            std::cmp::Reverse(relevance_score(r, &kws)),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn r(url: &str, engine: SearchEngine) -> SearchResult {
        SearchResult::new(url, format!("title {url}"), "", engine)
    }

    fn urls(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn test_alternate_round_robin() {
        let google = vec![
            r("https://a.com/1", SearchEngine::Google),
            r("https://a.com/2", SearchEngine::Google),
            r("https://a.com/3", SearchEngine::Google),
        ];
        let bing = vec![r("https://b.com/1", SearchEngine::Bing)];
        let merged = merge_results(vec![google, bing], MergeStrategy::Alternate, "", 10);
        assert_eq!(
            urls(&merged),
            vec![
                "https://a.com/1",
                "https://b.com/1",
                "https://a.com/2",
                "https://a.com/3"
            ]
        );
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let google = vec![r("https://x.com/page", SearchEngine::Google)];
        let bing = vec![
            r("https://x.com/page/", SearchEngine::Bing),
            r("https://x.com/page#intro", SearchEngine::Bing),
            r("https://y.com", SearchEngine::Bing),
        ];
        let merged = merge_results(vec![google, bing], MergeStrategy::Alternate, "", 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].engine, SearchEngine::Google);
        assert_eq!(merged[1].url, "https://y.com");
    }

    #[test]
    fn test_alternate_is_idempotent() {
        let google = vec![
            r("https://a.com/1", SearchEngine::Google),
            r("https://a.com/2", SearchEngine::Google),
        ];
        let ddg = vec![
            r("https://d.com/1", SearchEngine::DuckDuckGo),
            r("https://a.com/1", SearchEngine::DuckDuckGo),
        ];
        let once = merge_results(vec![google, ddg], MergeStrategy::Alternate, "", 10);
        let twice = merge_results(vec![once.clone()], MergeStrategy::Alternate, "", 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_truncates_to_max() {
        let list: Vec<_> = (0..20)
            .map(|i| r(&format!("https://a.com/{i}"), SearchEngine::Google))
            .collect();
        let merged = merge_results(vec![list], MergeStrategy::Alternate, "", 5);
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn test_relevance_prefers_trusted_buckets() {
        let list = vec![
            SearchResult::new(
                "https://someblog.com/solar",
                "Solar panel efficiency tips",
                "solar panel efficiency",
                SearchEngine::Google,
            ),
            SearchResult::new(
                "https://en.wikipedia.org/wiki/Solar_panel",
                "Solar panel",
                "",
                SearchEngine::Google,
            ),
            SearchResult::new(
                "https://arxiv.org/abs/1234",
                "Perovskite tandem cells",
                "",
                SearchEngine::Google,
            ),
        ];
        let merged = merge_results(
            vec![list],
            MergeStrategy::Relevance,
            "solar panel efficiency",
            10,
        );
        assert_eq!(
            urls(&merged),
            vec![
                "https://arxiv.org/abs/1234",
                "https://en.wikipedia.org/wiki/Solar_panel",
                "https://someblog.com/solar"
            ]
        );
    }

    #[test]
    fn test_relevance_orders_by_keyword_overlap_within_bucket() {
        let list = vec![
            SearchResult::new("https://one.com", "Gardening", "", SearchEngine::Bing),
            SearchResult::new(
                "https://two.com",
                "Solar efficiency explained",
                "efficiency",
                SearchEngine::Bing,
            ),
        ];
        let merged = merge_results(vec![list], MergeStrategy::Relevance, "solar efficiency", 10);
        assert_eq!(merged[0].url, "https://two.com");
    }

    #[test]
    fn test_date_strategy_undated_last() {
        let now = Utc::now();
        let list = vec![
            r("https://undated.com", SearchEngine::Google),
            r("https://old.com", SearchEngine::Google).with_date(now - Duration::days(400)),
            r("https://new.com", SearchEngine::Google).with_date(now - Duration::days(1)),
        ];
        let merged = merge_results(vec![list], MergeStrategy::Date, "", 10);
        assert_eq!(
            urls(&merged),
            vec!["https://new.com", "https://old.com", "https://undated.com"]
        );
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Solar   Panel\tEfficiency "), "solar panel efficiency");
    }
}
