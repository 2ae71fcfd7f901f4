//! Turning free-form model output into structured pieces, with
//! deterministic defaults for anything missing.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::fetch::domain_of;

/// Social, video and shopping sites that rarely hold citable content.
pub const IRRELEVANT_DOMAINS: &[&str] = &[
    "pinterest.com",
    "instagram.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "tiktok.com",
    "reddit.com",
    "quora.com",
    "linkedin.com",
    "amazon.com",
    "ebay.com",
    "etsy.com",
    "walmart.com",
    "target.com",
];

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*•]+|\d+\s*[.):-])\s*").expect("valid regex"));

static PREAMBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:here are|here is|i will|i'll|let me|these are|i recommend|completed:|search for:).*?:\s*")
        .expect("valid regex")
});

const META_PREFIXES: &[&str] = &["query", "search", "investigate", "explore", "research"];

/// Extract search queries from a model reply, one per line.
///
/// Strips list markers and chatty lead-ins, drops one-word and meta lines,
/// removes case-insensitive duplicates and caps the result at `breadth`.
pub fn parse_query_lines(text: &str, breadth: u32) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut queries = Vec::new();
    for raw in text.lines() {
        let line = raw.trim().replace("**", "");
        let line = LIST_MARKER.replace(&line, "");
        let line = PREAMBLE.replace(&line, "");
        let line = line.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
        if line.split_whitespace().count() < 2 {
            continue;
        }
        let lower = line.to_lowercase();
        if META_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            continue;
        }
        if seen.insert(lower) {
            queries.push(line.to_string());
        }
        if queries.len() >= breadth as usize {
            break;
        }
    }
    queries
}

/// A heading and the text under it.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Lowercased heading without markup.
    pub heading: String,
    pub body: String,
}

/// Split markdown-ish text on heading lines.
///
/// A heading is a `#` line, a `**bold**` line, or a short line ending in `:`.
pub fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for line in text.lines() {
        if let Some(heading) = heading_of(line) {
            sections.push(Section {
                heading,
                body: String::new(),
            });
        } else if let Some(current) = sections.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    for section in &mut sections {
        section.body = section.body.trim().to_string();
    }
    sections
}

fn heading_of(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let is_hash = trimmed.starts_with('#');
    let is_bold = trimmed.starts_with("**") && trimmed.ends_with("**") && trimmed.len() > 4;
    let is_label = trimmed.ends_with(':')
        && !trimmed.starts_with(['-', '*', '•'])
        && trimmed.split_whitespace().count() <= 5;
    if !(is_hash || is_bold || is_label) {
        return None;
    }
    let name = trimmed
        .trim_start_matches('#')
        .replace("**", "")
        .trim()
        .trim_end_matches(':')
        .to_string();
    let name = LIST_MARKER.replace(&name, "").trim().to_lowercase();
    if name.is_empty() { None } else { Some(name) }
}

/// First section whose heading contains any alias.
pub fn find_section<'a>(sections: &'a [Section], aliases: &[&str]) -> Option<&'a Section> {
    aliases
        .iter()
        .find_map(|alias| sections.iter().find(|s| s.heading.contains(alias)))
}

/// Bullet or numbered items of a section body; plain lines count as items.
pub fn list_items(body: &str) -> Vec<String> {
    body.lines()
        .map(|l| LIST_MARKER.replace(l.trim(), "").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn items_or(sections: &[Section], aliases: &[&str], default: Vec<String>) -> Vec<String> {
    let items = find_section(sections, aliases)
        .map(|s| list_items(&s.body))
        .unwrap_or_default();
    if items.is_empty() { default } else { items }
}

fn paragraph_or(sections: &[Section], aliases: &[&str], default: &str) -> String {
    match find_section(sections, aliases) {
        Some(s) if !s.body.is_empty() => s.body.clone(),
        _ => default.to_string(),
    }
}

fn bullets(out: &mut String, items: &[String]) {
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
}

/// Research plan produced by the Initialize node.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchPlan {
    pub objectives: Vec<String>,
    pub key_areas: Vec<String>,
    pub methodology: String,
    pub expected_outcomes: Vec<String>,
}

impl ResearchPlan {
    /// Parse a model reply; missing sections take their defaults.
    pub fn parse(text: &str, query: &str) -> Self {
        let sections = split_sections(text);
        let fallback = Self::fallback(query);
        Self {
            objectives: items_or(&sections, &["objective", "goal", "aim"], fallback.objectives),
            key_areas: items_or(
                &sections,
                &["key area", "areas to investigate", "investigation area"],
                fallback.key_areas,
            ),
            methodology: paragraph_or(
                &sections,
                &["methodology", "approach", "method"],
                &fallback.methodology,
            ),
            expected_outcomes: items_or(
                &sections,
                &["expected outcome", "outcome", "expected result", "result"],
                fallback.expected_outcomes,
            ),
        }
    }

    pub fn fallback(query: &str) -> Self {
        Self {
            objectives: vec![format!("Understand the key aspects of {query}")],
            key_areas: vec![
                "Primary concepts and definitions".to_string(),
                "Current applications and examples".to_string(),
                "Future trends and developments".to_string(),
            ],
            methodology: "Systematic review of available literature and analysis of current \
                          applications and examples."
                .to_string(),
            expected_outcomes: vec![
                format!("Comprehensive understanding of {query}"),
                "Identification of key challenges and opportunities".to_string(),
            ],
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Research Plan\n\n## Objectives\n\n");
        bullets(&mut out, &self.objectives);
        out.push_str("\n## Key Areas to Investigate\n\n");
        bullets(&mut out, &self.key_areas);
        out.push_str(&format!("\n## Methodology\n\n{}\n", self.methodology));
        out.push_str("\n## Expected Outcomes\n\n");
        bullets(&mut out, &self.expected_outcomes);
        out
    }
}

/// Plan used when every model tier fails.
pub fn minimal_plan(query: &str) -> String {
    format!(
        "# Research Plan\n\nResearch plan for: {query}\n\n- Investigate key aspects\n\
         - Analyze relevant sources\n- Synthesize findings\n"
    )
}

/// Reflection between Search passes.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub key_insights: Vec<String>,
    pub knowledge_gaps: Vec<String>,
    pub next_steps: Vec<String>,
    pub overall: String,
}

impl Reflection {
    pub fn parse(text: &str, query: &str) -> Self {
        let sections = split_sections(text);
        let fallback = Self::fallback(query);
        Self {
            key_insights: items_or(
                &sections,
                &["key insight", "insight", "key finding"],
                fallback.key_insights,
            ),
            knowledge_gaps: items_or(
                &sections,
                &["knowledge gap", "gap", "unanswered question", "question"],
                fallback.knowledge_gaps,
            ),
            next_steps: items_or(
                &sections,
                &["next step", "recommendation", "future direction", "step"],
                fallback.next_steps,
            ),
            overall: paragraph_or(
                &sections,
                &["overall reflection", "reflection summary", "summary", "conclusion"],
                &fallback.overall,
            ),
        }
    }

    pub fn fallback(query: &str) -> Self {
        Self {
            key_insights: vec![format!("Research is progressing on {query}")],
            knowledge_gaps: vec!["Further details needed on specific aspects".to_string()],
            next_steps: vec![
                "Continue investigating primary aspects".to_string(),
                "Search for more specific examples".to_string(),
            ],
            overall: "The research is making progress and has uncovered valuable information, \
                      but further investigation is needed in key areas."
                .to_string(),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("## Key Insights\n\n");
        bullets(&mut out, &self.key_insights);
        out.push_str("\n## Knowledge Gaps\n\n");
        bullets(&mut out, &self.knowledge_gaps);
        out.push_str("\n## Next Steps\n\n");
        bullets(&mut out, &self.next_steps);
        out.push_str(&format!("\n## Overall Reflection\n\n{}\n", self.overall));
        out
    }
}

/// Reflection used when every model tier fails.
pub const MINIMAL_REFLECTION: &str = "## Research Reflection\n\nThe research is progressing. \
     Further investigation is needed to develop a more comprehensive understanding of the topic.";

/// Candidates mentioned in a model reply, in candidate order.
pub fn select_urls(response: &str, candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|url| response.contains(url.as_str()))
        .cloned()
        .collect()
}

/// False for URLs on [`IRRELEVANT_DOMAINS`] (or their subdomains) and for
/// URLs without a host.
pub fn is_relevant_url(url: &str) -> bool {
    let Some(domain) = domain_of(url) else {
        return false;
    };
    !IRRELEVANT_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
}
