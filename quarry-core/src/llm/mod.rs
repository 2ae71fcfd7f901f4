//! Language model seam.
//!
//! The research controller only needs `generate(prompt) -> text`. Prompt
//! wording lives in [`crate::research::prompts`]; this module owns the call
//! contract, an OpenAI-compatible HTTP client and a scripted mock.

mod mock;
mod openai;

pub use mock::MockLanguageModel;
pub use openai::OpenAiCompatibleModel;

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::LlmError;

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Model identifier, for logs and result metadata.
    fn model_name(&self) -> &str;
}

/// Call `model.generate`, retrying transient errors with exponential backoff.
///
/// Backoff is `min(2^attempt, 32)` seconds, or the provider's retry-after
/// hint when it asks for longer.
pub async fn generate_with_retry(
    model: &dyn LanguageModel,
    prompt: &str,
    max_retries: u32,
) -> Result<String, LlmError> {
    let mut attempt = 0u32;
    loop {
        match model.generate(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let backoff_secs = std::cmp::min(1u64 << attempt, 32);
                let wait = match &e {
                    LlmError::RateLimited { retry_after_secs } => {
                        std::cmp::max(*retry_after_secs, backoff_secs)
                    }
                    _ => backoff_secs,
                };
                info!(
                    attempt = attempt + 1,
                    max_retries,
                    backoff_secs = wait,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
