use super::state::ResearchStatus;

/// Progress notifications from a research run.
///
/// Called synchronously from the controller task; implementations should
/// return quickly.
pub trait ResearchCallback: Send + Sync {
    /// Called when the controller enters a new node.
    fn on_status_change(&self, status: ResearchStatus, progress: f32);
    /// Called after sub-queries are generated for a pass.
    fn on_queries_generated(&self, queries: &[String]);
    /// Called when a sub-query has been searched, fetched and analyzed.
    fn on_sub_query_complete(&self, query: &str, sources_found: usize);
    /// Called for every chain-of-thought entry.
    fn on_thought(&self, thought: &str);
}

/// No-op callback for testing.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_status_change(&self, _status: ResearchStatus, _progress: f32) {}
    fn on_queries_generated(&self, _queries: &[String]) {}
    fn on_sub_query_complete(&self, _query: &str, _sources_found: usize) {}
    fn on_thought(&self, _thought: &str) {}
}
