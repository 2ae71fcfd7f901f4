//! Content extraction: a three-level fallback chain plus text normalization.
//!
//! 1. Structured: the page's `article`/`main` region, block by block, with
//!    navigation and boilerplate subtrees skipped.
//! 2. Heuristic: the largest content-like container after discarding
//!    navigation, ads and scripts.
//! 3. Raw: a tag-stripping scan of the whole document, truncated.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

const MIN_STRUCTURED_CHARS: usize = 200;
const MIN_HEURISTIC_CHARS: usize = 80;
const RAW_TRUNCATE_CHARS: usize = 8_000;

const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "footer", "header", "aside", "form", "svg",
    "iframe", "button",
];

const BOILERPLATE_HINTS: &[&str] = &[
    "nav", "menu", "footer", "sidebar", "comment", "advert", "banner", "cookie", "share", "social",
    "related", "promo", "newsletter", "subscribe", "breadcrumb",
];

const CONTENT_HINTS: &[&str] = &["content", "main", "article", "body", "post", "entry", "story"];

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*\d+(?:\s*[,\-–]\s*\d+)*\s*\]").expect("valid regex"));
static MARKUP_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^<>]{0,200}>").expect("valid regex"));
static INLINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Which level of the chain produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Structured,
    Heuristic,
    Raw,
    PlainText,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub title: String,
    pub text: String,
    pub method: ExtractionMethod,
    pub metadata: BTreeMap<String, String>,
}

/// Run the fallback chain over an HTML document. `None` when every level
/// comes up empty.
pub fn extract(html: &str, url: &str, max_chars: usize) -> Option<Extracted> {
    let document = Html::parse_document(html);
    let mut metadata = extract_metadata(&document);
    if let Some(domain) = super::domain_of(url) {
        metadata.insert("domain".to_string(), domain);
    }
    metadata.insert("url".to_string(), url.to_string());
    let title = page_title(&document, &metadata);

    let (text, method) = if let Some(text) = structured(&document) {
        (text, ExtractionMethod::Structured)
    } else if let Some(text) = heuristic(&document) {
        (text, ExtractionMethod::Heuristic)
    } else {
        let raw = strip_tags(html);
        (truncate_chars(&raw, RAW_TRUNCATE_CHARS), ExtractionMethod::Raw)
    };

    let text = clip_at_paragraph(&normalize_text(&text), max_chars);
    if text.is_empty() {
        return None;
    }
    Some(Extracted {
        title,
        text,
        method,
        metadata,
    })
}

/// Plain-text bodies skip HTML parsing entirely.
pub fn extract_plain(body: &str, url: &str, max_chars: usize) -> Option<Extracted> {
    let text = clip_at_paragraph(&normalize_text(body), max_chars);
    if text.is_empty() {
        return None;
    }
    let mut metadata = BTreeMap::new();
    if let Some(domain) = super::domain_of(url) {
        metadata.insert("domain".to_string(), domain);
    }
    metadata.insert("url".to_string(), url.to_string());
    Some(Extracted {
        title: String::new(),
        text,
        method: ExtractionMethod::PlainText,
        metadata,
    })
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn compact(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hints_match(elem: &ElementRef<'_>, hints: &[&str]) -> bool {
    let value = elem.value();
    let class = value.attr("class").unwrap_or_default().to_ascii_lowercase();
    let id = value.attr("id").unwrap_or_default().to_ascii_lowercase();
    let role = value.attr("role").unwrap_or_default().to_ascii_lowercase();
    hints
        .iter()
        .any(|h| class.contains(h) || id.contains(h) || role == *h)
}

/// True when `elem` sits inside a skipped subtree, looking no further up than `root`.
fn in_skipped_subtree(elem: &ElementRef<'_>, root: &ElementRef<'_>) -> bool {
    let mut node = Some(**elem);
    while let Some(current) = node {
        if current.id() == root.id() {
            return false;
        }
        if let Some(el) = ElementRef::wrap(current)
            && (SKIP_TAGS.contains(&el.value().name()) || hints_match(&el, BOILERPLATE_HINTS))
        {
            return true;
        }
        node = current.parent();
    }
    false
}

/// Text of `elem` with script/style contents excluded.
fn visible_text(elem: &ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in elem.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
                .unwrap_or(false)
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    compact(&out)
}

fn blocks_under(root: &ElementRef<'_>) -> Vec<String> {
    let Some(block_sel) = selector("h1, h2, h3, h4, p, li, blockquote, pre, td") else {
        return Vec::new();
    };
    let mut blocks = Vec::new();
    for elem in root.select(&block_sel) {
        if in_skipped_subtree(&elem, root) {
            continue;
        }
        // Nested blocks (p inside li, li inside td) would otherwise repeat text.
        let nested = elem.ancestors().take_while(|a| a.id() != root.id()).any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "p" | "li" | "blockquote" | "pre" | "td"))
                .unwrap_or(false)
        });
        if nested {
            continue;
        }
        let text = visible_text(&elem);
        if !text.is_empty() {
            blocks.push(text);
        }
    }
    blocks
}

fn structured(document: &Html) -> Option<String> {
    let root = ["article", "main", "[role=main]"]
        .iter()
        .filter_map(|s| selector(s))
        .find_map(|sel| document.select(&sel).next())?;

    let text = blocks_under(&root).join("\n\n");
    (text.chars().count() >= MIN_STRUCTURED_CHARS).then_some(text)
}

fn heuristic(document: &Html) -> Option<String> {
    let sel = selector("div, section, td, body")?;
    let paragraph = selector("p")?;

    let mut best: Option<(usize, ElementRef<'_>)> = None;
    for candidate in document.select(&sel) {
        if hints_match(&candidate, BOILERPLATE_HINTS) {
            continue;
        }
        let mut score: usize = candidate
            .select(&paragraph)
            .map(|p| visible_text(&p).len())
            .sum();
        if score == 0 {
            continue;
        }
        if hints_match(&candidate, CONTENT_HINTS) {
            score += score / 2;
        }
        // Prefer the innermost of equally scored containers.
        if best.as_ref().map(|(s, _)| score >= *s).unwrap_or(true) {
            best = Some((score, candidate));
        }
    }

    let (_, root) = best?;
    let blocks = blocks_under(&root);
    let text = if blocks.is_empty() {
        visible_text(&root)
    } else {
        blocks.join("\n\n")
    };
    (text.chars().count() >= MIN_HEURISTIC_CHARS).then_some(text)
}

/// Last-resort scan: drop tags, skip script/style bodies, break lines at
/// block-level tags.
pub fn strip_tags(html: &str) -> String {
    const BLOCK_TAGS: &[&str] = &[
        "p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
        "blockquote", "pre", "table",
    ];

    let mut out = String::with_capacity(html.len() / 2);
    let mut tag = String::new();
    let mut in_tag = false;
    let mut hidden_depth = 0usize;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let lower = tag.to_ascii_lowercase();
                let (closing, name) = match lower.strip_prefix('/') {
                    Some(rest) => (true, rest),
                    None => (false, lower.as_str()),
                };
                let name = name
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or_default();
                if matches!(name, "script" | "style" | "noscript") {
                    if closing {
                        hidden_depth = hidden_depth.saturating_sub(1);
                    } else if !lower.ends_with('/') {
                        hidden_depth += 1;
                    }
                } else if BLOCK_TAGS.contains(&name) {
                    out.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ if hidden_depth > 0 => {}
            _ => out.push(ch),
        }
    }
    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Collapse whitespace, strip control characters, leftover markup and
/// bracketed numeric citation markers like `[12]`.
pub fn normalize_text(text: &str) -> String {
    let no_control: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let no_control = no_control.replace('\r', "");
    let no_markup = MARKUP_FRAGMENT.replace_all(&no_control, " ");
    let no_markers = CITATION_MARKER.replace_all(&no_markup, "");

    let lines: Vec<String> = no_markers
        .lines()
        .map(|l| INLINE_WS.replace_all(l, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    EXCESS_NEWLINES
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Cut `text` to at most `max_chars`, preferring the last paragraph break
/// before the limit.
pub fn clip_at_paragraph(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut = truncate_chars(text, max_chars);
    match cut.rfind("\n\n") {
        Some(idx) if idx > cut.len() / 2 => cut[..idx].trim_end().to_string(),
        _ => cut,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn extract_metadata(document: &Html) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    let Some(meta_sel) = selector("meta[content]") else {
        return metadata;
    };
    for meta in document.select(&meta_sel) {
        let value = meta.value();
        let Some(key) = value.attr("name").or_else(|| value.attr("property")) else {
            continue;
        };
        let content = compact(value.attr("content").unwrap_or_default());
        if !content.is_empty() {
            metadata
                .entry(key.to_ascii_lowercase())
                .or_insert(content);
        }
    }
    metadata
}

fn page_title(document: &Html, metadata: &BTreeMap<String, String>) -> String {
    let from_tag = selector("title")
        .and_then(|sel| document.select(&sel).next())
        .map(|t| compact(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());
    from_tag
        .or_else(|| metadata.get("og:title").cloned())
        .or_else(|| {
            selector("h1")
                .and_then(|sel| document.select(&sel).next())
                .map(|h| visible_text(&h))
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_default()
}
