use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::LanguageModel;
use crate::error::LlmError;

type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Scripted language model for tests and offline runs.
///
/// Answers come from, in order: the queue of scripted results, the responder
/// closure, the default response. With none of those available the call fails,
/// which exercises the caller's fallback path.
pub struct MockLanguageModel {
    model: String,
    scripted: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    default_response: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            responder: None,
            default_response: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that always answers `text`.
    pub fn always(text: &str) -> Self {
        Self::new().with_default(text)
    }

    /// A model whose every call fails.
    pub fn failing() -> Self {
        Self::new()
    }

    /// Queue a successful response.
    pub fn with_response(self, text: &str) -> Self {
        self.push(Ok(text.to_string()));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: LlmError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn with_default(mut self, text: &str) -> Self {
        self.default_response = Some(text.to_string());
        self
    }

    /// Answer by inspecting the prompt. Returning `None` falls through to the
    /// default response.
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn push(&self, result: Result<String, LlmError>) {
        if let Ok(mut queue) = self.scripted.lock() {
            queue.push_back(result);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let scripted = self.scripted.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(result) = scripted {
            return result;
        }
        if let Some(text) = self.responder.as_ref().and_then(|f| f(prompt)) {
            return Ok(text);
        }
        self.default_response
            .clone()
            .ok_or_else(|| LlmError::ApiRequest {
                message: "mock model has no scripted response".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
