//! Web page fetching and content extraction.
//!
//! [`WebFetcher`] never returns an error: every failure mode (bad URL,
//! robots disallow, timeout, HTTP error, empty page) becomes a
//! [`ScrapedContent`] with `error` set, so batch callers can keep going.

mod extract;
mod fetcher;
mod metrics;
mod render;
mod robots;
mod transport;

pub use extract::{ExtractionMethod, Extracted, clip_at_paragraph, extract, normalize_text, strip_tags};
pub use fetcher::{FetchRequest, WebFetcher};
pub use metrics::{DomainMetrics, DomainStats};
#[cfg(feature = "browser")]
pub use render::ChromiumRenderer;
pub use render::PageRenderer;
pub use robots::{ROBOTS_AGENT, RobotsPolicy, RobotsRules};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::error::FetchError;

/// The outcome of fetching one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub url: String,
    pub title: String,
    pub text: String,
    pub html: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fetch_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionMethod>,
}

impl ScrapedContent {
    /// An error-tagged result for `url`.
    pub fn failed(url: impl Into<String>, error: &FetchError, fetch_duration_ms: u64) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            text: String::new(),
            html: String::new(),
            content_type: String::new(),
            metadata: BTreeMap::new(),
            error: Some(error.to_string()),
            fetch_duration_ms,
            extraction: None,
        }
    }

    /// No error and some extracted text.
    pub fn is_successful(&self) -> bool {
        self.error.is_none() && !self.text.trim().is_empty()
    }

    pub fn domain(&self) -> String {
        domain_of(&self.url).unwrap_or_default()
    }

    /// Title, or the URL when the page had none.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Lowercased host of `url` without a leading `www.`.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Parse and check that `url` is an absolute http(s) URL with a host.
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are supported"));
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("missing host"));
    }
    Ok(parsed)
}

/// Cache identity for a page: host without `www.`, path without trailing
/// slash, and query. Scheme and fragment are ignored.
pub fn page_cache_key(url: &Url) -> String {
    let host = url
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = url.path().trim_end_matches('/');
    match url.query() {
        Some(q) if !q.is_empty() => format!("page:{host}{path}?{q}"),
        _ => format!("page:{host}{path}"),
    }
}

/// Recognize bot walls and captcha interstitials served with HTTP 200.
pub fn detect_human_challenge(url: &str, content: &str) -> Option<&'static str> {
    let url_lc = url.to_ascii_lowercase();
    let content_lc = content.to_ascii_lowercase();

    if url_lc.contains("/sorry/") || content_lc.contains("/sorry/index") {
        return Some("challenge redirect (/sorry/) detected");
    }
    if content_lc.contains("g-recaptcha") || content_lc.contains("hcaptcha") {
        return Some("captcha widget detected");
    }
    if content_lc.contains("i'm not a robot") || content_lc.contains("i am not a robot") {
        return Some("robot-verification checkbox detected");
    }
    if content_lc.contains("verify you are human")
        || content_lc.contains("checking your browser before accessing")
    {
        return Some("human-verification interstitial detected");
    }
    if url_lc.contains("duckduckgo") && content_lc.contains("anomaly-modal") {
        return Some("duckduckgo anomaly page detected");
    }
    None
}
