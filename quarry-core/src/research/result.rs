//! The outcome of a research run and its on-disk form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::state::{ResearchStatus, SourceRecord};
use crate::citation::LearningStatistics;

/// Counters describing how a run went.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchStats {
    pub elapsed_secs: f64,
    /// Distinct candidate URLs returned by search.
    pub sources_found: usize,
    /// Pages fetched and extracted successfully.
    pub fetched_sources: usize,
    pub subqueries: usize,
    pub depth_reached: u32,
    pub iterations: u32,
    #[serde(default)]
    pub breadth: u32,
}

impl ResearchStats {
    /// `"1m 05s"` or `"42.3s"`.
    pub fn elapsed_display(&self) -> String {
        let secs = self.elapsed_secs.max(0.0);
        if secs >= 60.0 {
            let whole = secs as u64;
            format!("{}m {:02}s", whole / 60, whole % 60)
        } else {
            format!("{secs:.1}s")
        }
    }
}

/// A finished (or interrupted) research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub id: Uuid,
    pub query: String,
    /// Final markdown report.
    pub report: String,
    /// Accumulated notes. Never empty.
    pub findings: String,
    pub sources: Vec<SourceRecord>,
    pub selected_sources: Vec<String>,
    pub subqueries: Vec<String>,
    pub depth: u32,
    pub breadth: u32,
    pub interrupted: bool,
    /// Node the run ended on; `Complete` unless the run was cut short.
    pub status: ResearchStatus,
    pub chain_of_thought: Vec<String>,
    pub research_stats: ResearchStats,
    pub citation_stats: LearningStatistics,
    pub timestamp: DateTime<Utc>,
}

/// One line of `quarry sessions`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub id: Uuid,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub sources: usize,
    pub interrupted: bool,
}

impl ResearchResult {
    /// Render the report followed by a short process summary.
    pub fn to_markdown(&self, include_chain_of_thought: bool) -> String {
        let stats = &self.research_stats;
        let mut lines = vec![
            format!("# {}\n", self.query),
            format!("{}\n", self.report.trim_end()),
            "## Research Process\n".to_string(),
            format!("- **Depth**: {}", self.depth),
            format!("- **Breadth**: {}", self.breadth),
            format!("- **Time Taken**: {}", stats.elapsed_display()),
            format!("- **Subqueries Explored**: {}", stats.subqueries),
            format!("- **Sources Analyzed**: {}", stats.fetched_sources),
        ];

        let learnings = self.citation_stats.total_learnings;
        if learnings > 0 {
            lines.push(format!("- **Total Learnings Extracted**: {learnings}"));
            lines.push(format!(
                "- **Source Coverage**: {} sources with {learnings} tracked information points",
                self.citation_stats.total_sources
            ));
            let domains = self.citation_stats.reliability_by_domain.len();
            if domains > 0 {
                lines.push(format!(
                    "- **Source Quality**: {domains} domains assessed for reliability"
                ));
            }
        }
        if self.interrupted {
            lines.push("- **Status**: interrupted before completion".to_string());
        }
        lines.push(String::new());

        if include_chain_of_thought && !self.chain_of_thought.is_empty() {
            lines.push("## Research Process: Chain of Thought\n".to_string());
            for thought in &self.chain_of_thought {
                lines.push(format!("- {thought}"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    fn sessions_dir(base_dir: &Path) -> PathBuf {
        base_dir.join("research").join("sessions")
    }

    /// Save to `<base_dir>/research/sessions/<id>.json`.
    pub fn save(&self, base_dir: &Path) -> Result<PathBuf, std::io::Error> {
        let dir = Self::sessions_dir(base_dir);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.id));
        let data = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        crate::persistence::atomic_write(&path, data.as_bytes())?;
        Ok(path)
    }

    pub fn load(base_dir: &Path, id: &Uuid) -> Result<Self, std::io::Error> {
        let path = Self::sessions_dir(base_dir).join(format!("{id}.json"));
        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Delete every saved session. Returns how many files were removed.
    pub fn remove_all(base_dir: &Path) -> Result<usize, std::io::Error> {
        let dir = Self::sessions_dir(base_dir);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Saved results, newest first. Unreadable files are skipped.
    pub fn list(base_dir: &Path) -> Vec<ResultSummary> {
        let dir = Self::sessions_dir(base_dir);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut summaries: Vec<ResultSummary> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .filter_map(|data| serde_json::from_str::<ResearchResult>(&data).ok())
            .map(|result| ResultSummary {
                id: result.id,
                query: result.query,
                timestamp: result.timestamp,
                sources: result.research_stats.fetched_sources,
                interrupted: result.interrupted,
            })
            .collect();
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result(query: &str, timestamp: DateTime<Utc>) -> ResearchResult {
        ResearchResult {
            id: Uuid::new_v4(),
            query: query.to_string(),
            report: "Report body [1].".to_string(),
            findings: "notes".to_string(),
            sources: Vec::new(),
            selected_sources: vec!["https://a.org".to_string()],
            subqueries: vec!["a b".to_string()],
            depth: 1,
            breadth: 2,
            interrupted: false,
            status: ResearchStatus::Complete,
            chain_of_thought: vec!["[10:00:00] started".to_string()],
            research_stats: ResearchStats {
                elapsed_secs: 75.0,
                sources_found: 3,
                fetched_sources: 2,
                subqueries: 1,
                depth_reached: 1,
                iterations: 1,
                breadth: 2,
            },
            citation_stats: LearningStatistics::default(),
            timestamp,
        }
    }

    #[test]
    fn test_markdown_layout() {
        let md = result("solar", Utc::now()).to_markdown(false);
        assert!(md.starts_with("# solar\n\nReport body [1].\n\n## Research Process\n"));
        assert!(md.contains("- **Time Taken**: 1m 15s"));
        assert!(md.contains("- **Sources Analyzed**: 2"));
        assert!(!md.contains("Chain of Thought"));

        let with_thoughts = result("solar", Utc::now()).to_markdown(true);
        assert!(with_thoughts.contains("- [10:00:00] started"));
    }

    #[test]
    fn test_elapsed_display() {
        let stats = ResearchStats {
            elapsed_secs: 4.31,
            ..Default::default()
        };
        assert_eq!(stats.elapsed_display(), "4.3s");
    }

    #[test]
    fn test_save_load_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let older = result("older", Utc::now() - Duration::hours(1));
        let newer = result("newer", Utc::now());
        older.save(dir.path()).unwrap();
        let path = newer.save(dir.path()).unwrap();
        assert!(path.ends_with(format!("research/sessions/{}.json", newer.id)));

        let loaded = ResearchResult::load(dir.path(), &newer.id).unwrap();
        assert_eq!(loaded.query, "newer");
        assert_eq!(loaded.research_stats, newer.research_stats);

        let list = ResearchResult::list(dir.path());
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].query, "newer");
        assert_eq!(list[1].query, "older");
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ResearchResult::list(dir.path()).is_empty());
        assert_eq!(ResearchResult::remove_all(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_remove_all_sessions() {
        let dir = tempfile::TempDir::new().unwrap();
        result("a", Utc::now()).save(dir.path()).unwrap();
        let kept = result("b", Utc::now()).save(dir.path()).unwrap();
        let note = kept.with_extension("txt");
        std::fs::write(&note, "keep").unwrap();

        assert_eq!(ResearchResult::remove_all(dir.path()).unwrap(), 2);
        assert!(ResearchResult::list(dir.path()).is_empty());
        assert!(note.exists());
    }
}
