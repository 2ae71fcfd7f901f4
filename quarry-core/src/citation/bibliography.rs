use serde::{Deserialize, Serialize};

use super::{CitationStyle, NO_DATE, UNKNOWN, UNTITLED};

/// One line of a reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibliographyEntry {
    pub id: u32,
    pub url: String,
    pub title: String,
    /// `YYYY-MM-DD` or empty.
    pub accessed: String,
    pub source_type: String,
    /// False for ids a report used that were never registered.
    pub registered: bool,
}

impl BibliographyEntry {
    /// Marked stand-in for a citation id with no registered source.
    pub fn placeholder(id: u32) -> Self {
        Self {
            id,
            url: String::new(),
            title: String::new(),
            accessed: String::new(),
            source_type: UNKNOWN.to_string(),
            registered: false,
        }
    }

    fn title_or_placeholder(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() { UNTITLED } else { title }
    }

    fn url_or_placeholder(&self) -> &str {
        let url = self.url.trim();
        if url.is_empty() { UNKNOWN } else { url }
    }

    fn accessed_or_placeholder(&self) -> &str {
        let accessed = self.accessed.trim();
        if accessed.is_empty() { NO_DATE } else { accessed }
    }

    fn render(&self, style: CitationStyle) -> String {
        if !self.registered {
            return format!("[{}] Unknown source (citation not registered).", self.id);
        }
        let title = self.title_or_placeholder();
        let url = self.url_or_placeholder();
        let accessed = self.accessed_or_placeholder();
        let line = match style {
            CitationStyle::Apa => format!("[{}] {title}. Retrieved from {url} on {accessed}", self.id),
            CitationStyle::Mla => format!("[{}] \"{title}.\" {url}, accessed {accessed}", self.id),
            CitationStyle::Plain => format!("[{}] {title}. {url}", self.id),
        };
        with_full_stop(line)
    }
}

/// End `line` with exactly one period ("n.d." already carries its own).
fn with_full_stop(mut line: String) -> String {
    if !line.ends_with('.') {
        line.push('.');
    }
    line
}

/// Render a reference list. Entries are sorted by id; every entry produces a
/// line, missing fields become placeholders.
pub fn format_bibliography(entries: &[BibliographyEntry], style: CitationStyle) -> String {
    if entries.is_empty() {
        return "No sources cited.".to_string();
    }
    let mut sorted: Vec<&BibliographyEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.id);
    sorted.dedup_by_key(|e| e.id);

    let mut out = String::from("# References\n\n");
    for entry in sorted {
        out.push_str(&entry.render(style));
        out.push_str("\n\n");
    }
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}
