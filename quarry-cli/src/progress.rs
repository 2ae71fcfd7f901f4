//! Terminal progress output for research runs.

use quarry_core::research::{ResearchCallback, ResearchStatus};

/// Prints node transitions and sub-query completions to stderr.
pub struct ConsoleProgress {
    quiet: bool,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ResearchCallback for ConsoleProgress {
    fn on_status_change(&self, status: ResearchStatus, progress: f32) {
        if !self.quiet {
            eprintln!("[{:>3}%] {}", (progress * 100.0).round() as u32, describe(status));
        }
    }

    fn on_queries_generated(&self, queries: &[String]) {
        if self.quiet {
            return;
        }
        for q in queries {
            eprintln!("       - {q}");
        }
    }

    fn on_sub_query_complete(&self, query: &str, sources_found: usize) {
        if !self.quiet {
            eprintln!("       done: {query} ({sources_found} sources)");
        }
    }

    fn on_thought(&self, _thought: &str) {}
}

fn describe(status: ResearchStatus) -> &'static str {
    match status {
        ResearchStatus::Initialize => "Planning research",
        ResearchStatus::GenerateQueries => "Generating search queries",
        ResearchStatus::Search => "Searching and reading sources",
        ResearchStatus::Reflect => "Reflecting on findings",
        ResearchStatus::SelectSources => "Selecting sources",
        ResearchStatus::FormatCitations => "Formatting citations",
        ResearchStatus::SynthesizeReport => "Writing report",
        ResearchStatus::Finalize => "Finalizing",
        ResearchStatus::Complete => "Complete",
    }
}
