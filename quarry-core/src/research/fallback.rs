//! Three-tier model fallback shared by the controller and the AI searcher.

use tracing::warn;

use super::cancel::ResearchCancellation;
use crate::llm::LanguageModel;

/// Primary prompt, then simplified prompt, then `default`.
///
/// `parse` turns a reply into a value; `None` (an unusable reply) moves on to
/// the next tier like an error does. An abort skips the model entirely.
pub(crate) async fn with_fallback<T>(
    model: &dyn LanguageModel,
    cancellation: &ResearchCancellation,
    node: &'static str,
    primary: String,
    simplified: String,
    parse: impl Fn(&str) -> Option<T>,
    default: impl FnOnce() -> T,
) -> T {
    for (tier, prompt) in [("primary", primary), ("simplified", simplified)] {
        if cancellation.is_aborted() {
            break;
        }
        let reply = tokio::select! {
            reply = model.generate(&prompt) => reply,
            _ = cancellation.aborted() => break,
        };
        match reply {
            Ok(text) => match parse(&text) {
                Some(value) => return value,
                None => warn!(node, tier, "Model reply unusable; falling back"),
            },
            Err(e) => warn!(node, tier, error = %e, "Model call failed; falling back"),
        }
    }
    warn!(node, "Using deterministic default");
    default()
}
