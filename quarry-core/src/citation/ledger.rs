use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use super::bibliography::{BibliographyEntry, format_bibliography};
use super::similarity::{CharJaccard, SimilarityScorer};
use super::{
    CitationRecord, CitationStyle, Learning, SourceInfo, UNKNOWN, content_hash, normalize_content,
};
use crate::error::LedgerError;
use crate::persistence::{atomic_write_json, load_json};

/// Similarity at or above which two learnings are the same fact.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Paragraphs shorter than this are not worth recording as learnings.
const MIN_LEARNING_CHARS: usize = 20;

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

/// Result of checking a text's `[n]` markers against the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationValidation {
    pub valid: bool,
    pub used_ids: BTreeSet<u32>,
    /// Used but not registered. Includes every out-of-range id.
    pub invalid_ids: BTreeSet<u32>,
    /// Used ids above `max_valid_id`.
    pub out_of_range_ids: BTreeSet<u32>,
    /// Registered but never used.
    pub missing_ids: BTreeSet<u32>,
    /// Highest registered id, 0 when nothing is registered.
    pub max_valid_id: u32,
}

impl CitationValidation {
    /// Human-readable hint for fixing invalid markers.
    pub fn suggestion(&self) -> Option<String> {
        if self.valid {
            return None;
        }
        let ids: Vec<String> = self.invalid_ids.iter().map(|id| id.to_string()).collect();
        Some(if self.max_valid_id == 0 {
            format!("No citations are registered; remove [{}]", ids.join("], ["))
        } else {
            format!(
                "Invalid citations [{}]; valid ids are 1-{}",
                ids.join("], ["),
                self.max_valid_id
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStatistics {
    pub total_sources: usize,
    pub total_learnings: usize,
    pub total_citations: usize,
    pub categories: Vec<String>,
    pub sources_by_domain: BTreeMap<String, usize>,
    pub learnings_by_category: BTreeMap<String, usize>,
    /// Mean reliability per domain, over sources that were scored.
    pub reliability_by_domain: BTreeMap<String, f64>,
}

/// The exported form of a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
    #[serde(default)]
    pub learnings: BTreeMap<String, Learning>,
    #[serde(default)]
    pub source_to_learnings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub citations: BTreeMap<u32, CitationRecord>,
}

/// Registry of sources, learnings, and citation ids for one research run.
///
/// Invariants:
/// - a URL has at most one [`SourceInfo`] and at most one citation id;
/// - citation ids are allocated sequentially from 1 and never reused;
/// - every URL in a learning's `sources` has a [`SourceInfo`] and lists
///   that learning in `source_to_learnings`.
#[derive(Debug, Clone)]
pub struct CitationLedger {
    sources: BTreeMap<String, SourceInfo>,
    learnings: BTreeMap<String, Learning>,
    source_to_learnings: BTreeMap<String, Vec<String>>,
    categories: BTreeSet<String>,
    citations: BTreeMap<u32, CitationRecord>,
    url_to_id: HashMap<String, u32>,
    normalized_index: HashMap<String, String>,
    next_id: u32,
    scorer: Arc<dyn SimilarityScorer>,
    threshold: f64,
}

impl Default for CitationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CitationLedger {
    pub fn new() -> Self {
        Self::with_scorer(Arc::new(CharJaccard), DEFAULT_SIMILARITY_THRESHOLD)
    }

    pub fn with_scorer(scorer: Arc<dyn SimilarityScorer>, threshold: f64) -> Self {
        Self {
            sources: BTreeMap::new(),
            learnings: BTreeMap::new(),
            source_to_learnings: BTreeMap::new(),
            categories: BTreeSet::new(),
            citations: BTreeMap::new(),
            url_to_id: HashMap::new(),
            normalized_index: HashMap::new(),
            next_id: 1,
            scorer,
            threshold,
        }
    }

    // --- Citations ---

    /// Id for `url`, allocating the next one on first sight.
    pub fn register_citation(&mut self, url: &str) -> u32 {
        self.register_citation_with_context(url, "")
    }

    /// Like [`register_citation`](Self::register_citation), also recording
    /// how the source was used. Duplicate contexts are ignored.
    pub fn register_citation_with_context(&mut self, url: &str, context: &str) -> u32 {
        let url = url.trim();
        let context = context.trim();
        let id = match self.url_to_id.get(url) {
            Some(id) => *id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.url_to_id.insert(url.to_string(), id);
                self.citations.insert(
                    id,
                    CitationRecord {
                        id,
                        url: url.to_string(),
                        metadata: BTreeMap::new(),
                        contexts: Vec::new(),
                    },
                );
                debug!(id, url, "Registered citation");
                id
            }
        };
        if !context.is_empty()
            && let Some(record) = self.citations.get_mut(&id)
            && !record.contexts.iter().any(|c| c == context)
        {
            record.contexts.push(context.to_string());
        }
        id
    }

    /// Register every URL not yet known, in order.
    pub fn bulk_register_sources<S: AsRef<str>>(&mut self, urls: &[S]) -> Vec<u32> {
        urls.iter()
            .map(|u| self.register_citation(u.as_ref()))
            .collect()
    }

    pub fn citation_id(&self, url: &str) -> Option<u32> {
        self.url_to_id.get(url.trim()).copied()
    }

    pub fn citation(&self, id: u32) -> Option<&CitationRecord> {
        self.citations.get(&id)
    }

    pub fn citation_url(&self, id: u32) -> Option<&str> {
        self.citations.get(&id).map(|c| c.url.as_str())
    }

    pub fn citation_contexts(&self, id: u32) -> &[String] {
        self.citations
            .get(&id)
            .map(|c| c.contexts.as_slice())
            .unwrap_or_default()
    }

    /// Merge `metadata` into the record for `id`.
    pub fn update_citation_metadata(
        &mut self,
        id: u32,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), LedgerError> {
        let record = self
            .citations
            .get_mut(&id)
            .ok_or(LedgerError::UnknownCitation { id })?;
        record.metadata.extend(metadata);
        Ok(())
    }

    /// Cited URLs in id order.
    pub fn all_citation_urls(&self) -> Vec<String> {
        self.citations.values().map(|c| c.url.clone()).collect()
    }

    pub fn citation_count(&self) -> usize {
        self.citations.len()
    }

    pub fn max_citation_id(&self) -> u32 {
        self.citations.keys().next_back().copied().unwrap_or(0)
    }

    /// Check every `[n]` marker in `text` against the registered ids.
    pub fn validate_citations(&self, text: &str) -> CitationValidation {
        let used_ids: BTreeSet<u32> = CITATION_MARKER
            .captures_iter(text)
            .map(|c| c[1].parse::<u32>().unwrap_or(u32::MAX))
            .collect();
        let registered: BTreeSet<u32> = self.citations.keys().copied().collect();
        let max_valid_id = self.max_citation_id();

        let out_of_range_ids: BTreeSet<u32> = used_ids
            .iter()
            .copied()
            .filter(|id| *id > max_valid_id)
            .collect();
        let invalid_ids: BTreeSet<u32> = used_ids
            .difference(&registered)
            .copied()
            .chain(out_of_range_ids.iter().copied())
            .collect();
        let missing_ids: BTreeSet<u32> = registered.difference(&used_ids).copied().collect();

        CitationValidation {
            valid: invalid_ids.is_empty(),
            used_ids,
            invalid_ids,
            out_of_range_ids,
            missing_ids,
            max_valid_id,
        }
    }

    /// Replace every invalid `[n]` marker in `text` with `[?]`.
    pub fn sanitize_citations(&self, text: &str) -> (String, CitationValidation) {
        let validation = self.validate_citations(text);
        if validation.valid {
            return (text.to_string(), validation);
        }
        if let Some(hint) = validation.suggestion() {
            warn!(
                invalid = validation.invalid_ids.len(),
                max_valid_id = validation.max_valid_id,
                "{hint}"
            );
        }
        let cleaned = CITATION_MARKER.replace_all(text, |caps: &regex::Captures<'_>| {
            let id = caps[1].parse::<u32>().unwrap_or(u32::MAX);
            if validation.invalid_ids.contains(&id) {
                "[?]".to_string()
            } else {
                caps[0].to_string()
            }
        });
        (cleaned.into_owned(), validation)
    }

    // --- Bibliography ---

    /// Bibliography entry for `id`; a marked placeholder when unregistered.
    pub fn bibliography_entry(&self, id: u32) -> BibliographyEntry {
        let Some(record) = self.citations.get(&id) else {
            return BibliographyEntry::placeholder(id);
        };
        let source = self.sources.get(&record.url);
        let title = record
            .metadata
            .get("title")
            .cloned()
            .or_else(|| source.map(|s| s.title.clone()))
            .unwrap_or_default();
        let accessed = record
            .metadata
            .get("accessed")
            .cloned()
            .or_else(|| source.map(|s| s.access_time.format("%Y-%m-%d").to_string()))
            .unwrap_or_default();
        BibliographyEntry {
            id,
            url: record.url.clone(),
            title,
            accessed,
            source_type: source
                .map(|s| s.source_type.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            registered: true,
        }
    }

    /// Entries for every registered citation.
    pub fn bibliography_entries(&self) -> Vec<BibliographyEntry> {
        self.citations
            .keys()
            .map(|id| self.bibliography_entry(*id))
            .collect()
    }

    pub fn format_bibliography(&self, style: CitationStyle) -> String {
        format_bibliography(&self.bibliography_entries(), style)
    }

    /// Reference list for exactly the ids `text` cites.
    pub fn bibliography_for_text(&self, text: &str, style: CitationStyle) -> String {
        let entries: Vec<BibliographyEntry> = self
            .validate_citations(text)
            .used_ids
            .into_iter()
            .map(|id| self.bibliography_entry(id))
            .collect();
        format_bibliography(&entries, style)
    }

    // --- Sources ---

    /// Insert or update the source for `info.url`.
    pub fn add_source(&mut self, info: SourceInfo) -> String {
        let url = info.url.trim().to_string();
        match self.sources.get_mut(&url) {
            Some(existing) => existing.absorb(info),
            None => {
                let mut info = info;
                info.url = url.clone();
                if info.domain.is_empty() {
                    info.domain = UNKNOWN.to_string();
                }
                self.sources.insert(url.clone(), info);
                self.source_to_learnings.entry(url.clone()).or_default();
            }
        }
        url
    }

    pub fn source(&self, url: &str) -> Option<&SourceInfo> {
        self.sources.get(url.trim())
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceInfo> {
        self.sources.values()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn ensure_source(&mut self, url: &str) {
        if !self.sources.contains_key(url) {
            self.add_source(SourceInfo::new(url));
        }
    }

    fn link(&mut self, url: &str, hash_id: &str) {
        self.ensure_source(url);
        let list = self.source_to_learnings.entry(url.to_string()).or_default();
        if !list.iter().any(|h| h == hash_id) {
            list.push(hash_id.to_string());
        }
    }

    // --- Learnings ---

    /// Add a learning, merging it into an existing one when the normalized
    /// content is identical or similar enough. Returns the id it lives under.
    pub fn add_learning(&mut self, learning: Learning) -> String {
        let normalized = normalize_content(&learning.content);
        match self.find_similar(&normalized) {
            Some(existing_id) => {
                self.merge_into(&existing_id, learning);
                existing_id
            }
            None => self.insert_learning(learning, normalized),
        }
    }

    fn find_similar(&self, normalized: &str) -> Option<String> {
        if let Some(id) = self.normalized_index.get(normalized) {
            return Some(id.clone());
        }
        if normalized.is_empty() {
            return None;
        }
        let mut best: Option<(f64, &String)> = None;
        for (candidate, id) in &self.normalized_index {
            let score = self.scorer.score(normalized, candidate);
            if score < self.threshold {
                continue;
            }
            // Ties go to the smaller id so the choice does not depend on
            // hash map iteration order.
            let better = match best {
                None => true,
                Some((s, b)) => score > s || (score == s && id < b),
            };
            if better {
                best = Some((score, id));
            }
        }
        best.map(|(_, id)| id.clone())
    }

    fn insert_learning(&mut self, mut learning: Learning, normalized: String) -> String {
        if learning.hash_id.is_empty() {
            learning.hash_id = content_hash(&learning.content);
        }
        let hash_id = learning.hash_id.clone();
        for url in learning.sources.clone() {
            self.link(&url, &hash_id);
        }
        if let Some(category) = &learning.category {
            self.categories.insert(category.clone());
        }
        self.normalized_index.insert(normalized, hash_id.clone());
        self.learnings.insert(hash_id.clone(), learning);
        hash_id
    }

    fn merge_into(&mut self, existing_id: &str, incoming: Learning) {
        let mut new_sources = Vec::new();
        if let Some(existing) = self.learnings.get_mut(existing_id) {
            for url in incoming.sources {
                if !existing.sources.contains(&url) {
                    existing.sources.push(url.clone());
                    new_sources.push(url);
                }
            }
            for quote in incoming.quotes {
                if !existing.quotes.contains(&quote) {
                    existing.quotes.push(quote);
                }
            }
            existing.confidence = (existing.confidence + incoming.confidence) / 2.0;
            if existing.category.is_none() {
                existing.category = incoming.category.clone();
            }
            if !incoming.context.is_empty() && !existing.context.contains(&incoming.context) {
                if existing.context.is_empty() {
                    existing.context = incoming.context;
                } else {
                    existing.context.push(' ');
                    existing.context.push_str(&incoming.context);
                }
            }
        }
        if let Some(category) = incoming.category {
            self.categories.insert(category);
        }
        for url in new_sources {
            self.link(&url, existing_id);
        }
        debug!(hash_id = existing_id, "Merged duplicate learning");
    }

    /// Record each substantial paragraph of `text` as a learning backed by
    /// `source_url`. Returns the distinct ids touched, in paragraph order.
    pub fn extract_learnings_from_text(
        &mut self,
        text: &str,
        source_url: &str,
        context: &str,
    ) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for paragraph in PARAGRAPH_BREAK.split(text) {
            let paragraph = paragraph.trim();
            if paragraph.chars().count() < MIN_LEARNING_CHARS {
                continue;
            }
            let learning = Learning::new(paragraph)
                .with_source(source_url)
                .with_context(context)
                .with_quote(paragraph);
            let id = self.add_learning(learning);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn learning(&self, hash_id: &str) -> Option<&Learning> {
        self.learnings.get(hash_id)
    }

    pub fn learnings(&self) -> impl Iterator<Item = &Learning> {
        self.learnings.values()
    }

    pub fn learning_count(&self) -> usize {
        self.learnings.len()
    }

    pub fn get_learnings_from_source(&self, url: &str) -> Vec<&Learning> {
        self.source_to_learnings
            .get(url.trim())
            .map(|ids| ids.iter().filter_map(|id| self.learnings.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_sources_for_learning(&self, hash_id: &str) -> Vec<&SourceInfo> {
        self.learnings
            .get(hash_id)
            .map(|l| {
                l.sources
                    .iter()
                    .filter_map(|url| self.sources.get(url))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn get_learning_statistics(&self) -> LearningStatistics {
        let mut sources_by_domain: BTreeMap<String, usize> = BTreeMap::new();
        let mut reliability_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for source in self.sources.values() {
            let domain = source.display_domain().to_string();
            *sources_by_domain.entry(domain.clone()).or_default() += 1;
            if source.reliability_score > 0.0 {
                let entry = reliability_sums.entry(domain).or_default();
                entry.0 += source.reliability_score;
                entry.1 += 1;
            }
        }

        let mut learnings_by_category: BTreeMap<String, usize> = BTreeMap::new();
        for learning in self.learnings.values() {
            let category = learning
                .category
                .clone()
                .unwrap_or_else(|| "uncategorized".to_string());
            *learnings_by_category.entry(category).or_default() += 1;
        }

        LearningStatistics {
            total_sources: self.sources.len(),
            total_learnings: self.learnings.len(),
            total_citations: self.citations.len(),
            categories: self.categories.iter().cloned().collect(),
            sources_by_domain,
            learnings_by_category,
            reliability_by_domain: reliability_sums
                .into_iter()
                .map(|(domain, (sum, n))| (domain, sum / n as f64))
                .collect(),
        }
    }

    // --- Export / import ---

    pub fn export(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            sources: self.sources.clone(),
            learnings: self.learnings.clone(),
            source_to_learnings: self.source_to_learnings.clone(),
            categories: self.categories.clone(),
            citations: self.citations.clone(),
        }
    }

    /// Replace the ledger's contents with `snapshot`. The similarity scorer
    /// is kept. Fails without modifying the ledger if the snapshot assigns
    /// two ids to one URL or a citation's key disagrees with its id.
    pub fn import(&mut self, snapshot: LedgerSnapshot) -> Result<(), LedgerError> {
        let mut url_to_id = HashMap::new();
        for (key, record) in &snapshot.citations {
            if *key != record.id {
                return Err(LedgerError::Import {
                    message: format!("citation key {key} does not match id {}", record.id),
                });
            }
            if let Some(previous) = url_to_id.insert(record.url.clone(), record.id) {
                return Err(LedgerError::Import {
                    message: format!(
                        "URL {} has two citation ids ({previous} and {})",
                        record.url, record.id
                    ),
                });
            }
        }

        let normalized_index = snapshot
            .learnings
            .iter()
            .map(|(id, l)| (normalize_content(&l.content), id.clone()))
            .collect();

        self.next_id = snapshot.citations.keys().next_back().map_or(1, |max| max + 1);
        self.sources = snapshot.sources;
        self.learnings = snapshot.learnings;
        self.source_to_learnings = snapshot.source_to_learnings;
        self.categories = snapshot.categories;
        self.citations = snapshot.citations;
        self.url_to_id = url_to_id;
        self.normalized_index = normalized_index;
        Ok(())
    }

    pub fn export_to_file(&self, path: &Path) -> Result<(), LedgerError> {
        atomic_write_json(path, &self.export()).map_err(|e| LedgerError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!(
            path = %path.display(),
            sources = self.sources.len(),
            learnings = self.learnings.len(),
            "Exported citation ledger"
        );
        Ok(())
    }

    pub fn import_from_file(&mut self, path: &Path) -> Result<(), LedgerError> {
        let snapshot: LedgerSnapshot = load_json(path)
            .map_err(|e| LedgerError::File {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .ok_or_else(|| LedgerError::File {
                path: path.to_path_buf(),
                message: "file not found".to_string(),
            })?;
        self.import(snapshot)
    }
}
