//! Result-page parsers, one per engine.
//!
//! Each parser is a pure function of the response body so it can be tested
//! against captured pages. Selectors are tried in order; markup drift on one
//! selector falls through to the next.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

use super::{SearchEngine, SearchResult};
use crate::error::SearchError;

pub(crate) fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn text_of(elem: ElementRef<'_>) -> String {
    compact_ws(&elem.text().collect::<Vec<_>>().join(" "))
}

fn first_match<'a>(container: ElementRef<'a>, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|s| {
        Selector::parse(s)
            .ok()
            .and_then(|sel| container.select(&sel).next())
    })
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Google wraps outbound links as `/url?q=<target>&...`.
fn normalize_google_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("/url?") {
        let parsed = Url::parse(&format!("https://www.google.com{href}")).ok()?;
        let target = parsed
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.to_string())?;
        return is_http(&target).then_some(target);
    }
    if !is_http(href) {
        return None;
    }
    let host = Url::parse(href).ok()?.host_str()?.to_ascii_lowercase();
    if host.ends_with("google.com") || host.contains(".google.") {
        return None;
    }
    Some(href.to_string())
}

/// DuckDuckGo's HTML endpoint wraps links as `//duckduckgo.com/l/?uddg=<target>`.
fn normalize_duckduckgo_href(href: &str) -> Option<String> {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    let host = parsed.host_str().unwrap_or_default();
    if host.ends_with("duckduckgo.com") {
        let target = parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.to_string())?;
        if !is_http(target.trim()) {
            return None;
        }
        let mut dest = Url::parse(target.trim()).ok()?;
        dest.set_fragment(None);
        return Some(dest.to_string());
    }
    is_http(&absolute).then_some(absolute)
}

struct PageLayout<'s> {
    containers: &'s [&'s str],
    anchors: &'s [&'s str],
    titles: &'s [&'s str],
    snippets: &'s [&'s str],
}

fn collect(
    document: &Html,
    engine: SearchEngine,
    layout: &PageLayout<'_>,
    normalize: fn(&str) -> Option<String>,
    limit: usize,
) -> Vec<SearchResult> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for container_sel in layout.containers {
        let Ok(sel) = Selector::parse(container_sel) else {
            continue;
        };
        for container in document.select(&sel) {
            if out.len() >= limit {
                return out;
            }
            let Some(anchor) = first_match(container, layout.anchors) else {
                continue;
            };
            let Some(url) = anchor.value().attr("href").and_then(normalize) else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            let title = first_match(container, layout.titles)
                .map(text_of)
                .unwrap_or_else(|| text_of(anchor));
            if title.is_empty() {
                continue;
            }
            let snippet = first_match(container, layout.snippets)
                .map(text_of)
                .unwrap_or_default();
            out.push(SearchResult::new(url, title, snippet, engine));
        }
        if !out.is_empty() {
            break;
        }
    }
    out
}

fn normalize_bing_href(href: &str) -> Option<String> {
    let href = href.trim();
    is_http(href).then(|| href.to_string())
}

pub fn parse_google_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let layout = PageLayout {
        containers: &["div.g", "div.tF2Cxc", "div.MjjYud"],
        anchors: &["a[href]"],
        titles: &["h3"],
        snippets: &["div.VwiC3b", "span.aCOpRe", "div.IsZvec"],
    };
    collect(
        &document,
        SearchEngine::Google,
        &layout,
        normalize_google_href,
        limit,
    )
}

pub fn parse_duckduckgo_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let layout = PageLayout {
        containers: &[
            "div.result",
            "article[data-testid=\"result\"]",
            "div[data-testid=\"result\"]",
        ],
        anchors: &["a.result__a", "a[data-testid=\"result-title-a\"]"],
        titles: &[],
        snippets: &[
            "a.result__snippet",
            "div.result__snippet",
            "div[data-testid=\"result-snippet\"]",
        ],
    };
    collect(
        &document,
        SearchEngine::DuckDuckGo,
        &layout,
        normalize_duckduckgo_href,
        limit,
    )
}

pub fn parse_bing_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let layout = PageLayout {
        containers: &["li.b_algo"],
        anchors: &["h2 a"],
        titles: &[],
        snippets: &["div.b_caption p", "p.b_lineclamp2"],
    };
    collect(&document, SearchEngine::Bing, &layout, normalize_bing_href, limit)
}

/// Parse the Wikipedia opensearch response: `[query, [titles], [descriptions], [urls]]`.
pub fn parse_wikipedia_results(body: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
    let parse_err = |message: String| SearchError::Parse {
        engine: SearchEngine::Wikipedia.to_string(),
        message,
    };

    let value: Value = serde_json::from_str(body).map_err(|e| parse_err(e.to_string()))?;
    let array = value
        .as_array()
        .filter(|a| a.len() >= 4)
        .ok_or_else(|| parse_err("expected a four-element opensearch array".to_string()))?;

    let strings = |idx: usize| -> Vec<String> {
        array[idx]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    };
    let titles = strings(1);
    let snippets = strings(2);
    let urls = strings(3);

    Ok(titles
        .into_iter()
        .zip(urls)
        .enumerate()
        .filter(|(_, (title, url))| !title.is_empty() && is_http(url))
        .take(limit)
        .map(|(i, (title, url))| {
            let snippet = snippets.get(i).cloned().unwrap_or_default();
            SearchResult::new(url, title, snippet, SearchEngine::Wikipedia)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DDG_HTML: &str = r#"
        <html><body>
          <div class="result">
            <h2><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.nrel.gov%2Fpv%2Fcell-efficiency&rut=abc">
              Best Research-Cell Efficiency Chart
            </a></h2>
            <a class="result__snippet">NREL maintains a chart of the highest confirmed conversion efficiencies.</a>
          </div>
          <div class="result">
            <h2><a class="result__a" href="https://en.wikipedia.org/wiki/Solar_cell_efficiency">Solar-cell efficiency - Wikipedia</a></h2>
            <div class="result__snippet">Solar-cell efficiency is the portion of energy...</div>
          </div>
          <div class="result">
            <h2><a class="result__a" href="javascript:void(0)">Broken</a></h2>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_duckduckgo_decodes_redirects() {
        let results = parse_duckduckgo_results(DDG_HTML, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://www.nrel.gov/pv/cell-efficiency");
        assert_eq!(results[0].title, "Best Research-Cell Efficiency Chart");
        assert!(results[0].snippet.starts_with("NREL maintains"));
        assert_eq!(
            results[1].url,
            "https://en.wikipedia.org/wiki/Solar_cell_efficiency"
        );
        assert!(results.iter().all(|r| r.engine == SearchEngine::DuckDuckGo));
    }

    #[test]
    fn test_parse_duckduckgo_respects_limit() {
        assert_eq!(parse_duckduckgo_results(DDG_HTML, 1).len(), 1);
    }

    #[test]
    fn test_parse_google() {
        let html = r#"
            <div class="g">
              <a href="/url?q=https://www.energy.gov/solar&sa=U"><h3>Solar Energy | Department of Energy</h3></a>
              <div class="VwiC3b">Solar technologies convert sunlight into electrical energy.</div>
            </div>
            <div class="g">
              <a href="https://www.google.com/search?q=more"><h3>More results</h3></a>
            </div>
        "#;
        let results = parse_google_results(html, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://www.energy.gov/solar");
        assert_eq!(results[0].title, "Solar Energy | Department of Energy");
        assert!(results[0].snippet.contains("sunlight"));
    }

    #[test]
    fn test_parse_bing() {
        let html = r#"
            <ol id="b_results">
              <li class="b_algo">
                <h2><a href="https://www.sciencedirect.com/topics/solar">Solar efficiency overview</a></h2>
                <div class="b_caption"><p>Overview of photovoltaic efficiency limits.</p></div>
              </li>
              <li class="b_algo"><h2><a href="/relative">Relative</a></h2></li>
            </ol>
        "#;
        let results = parse_bing_results(html, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].snippet, "Overview of photovoltaic efficiency limits.");
    }

    #[test]
    fn test_parse_wikipedia_opensearch() {
        let body = r#"["solar",["Solar cell","Solar power"],["A device","Conversion of sunlight"],
            ["https://en.wikipedia.org/wiki/Solar_cell","https://en.wikipedia.org/wiki/Solar_power"]]"#;
        let results = parse_wikipedia_results(body, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].title, "Solar power");
        assert_eq!(results[1].snippet, "Conversion of sunlight");
    }

    #[test]
    fn test_parse_wikipedia_rejects_bad_shape() {
        assert!(parse_wikipedia_results("{}", 5).is_err());
        assert!(parse_wikipedia_results("not json", 5).is_err());
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert!(parse_google_results("<html></html>", 5).is_empty());
        assert!(parse_bing_results("", 5).is_empty());
    }
}
