//! OpenAI-compatible chat-completions client.
//!
//! Works with any endpoint that speaks `POST {base_url}/chat/completions`:
//! OpenAI, Azure-style proxies, Ollama, vLLM, LM Studio.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{LanguageModel, generate_with_retry};
use crate::config::LlmConfig;
use crate::error::LlmError;

pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiCompatibleModel {
    /// Build a client, resolving the API key from config or the environment.
    ///
    /// Local endpoints (localhost / 127.0.0.1) do not need a key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local =
            config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local endpoint; using placeholder bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("OpenAI-compatible: env var '{}' not set", config.api_key_env),
            })?;

        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else if e.is_connect() {
                    LlmError::Connection {
                        message: e.to_string(),
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("Request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(map_http_error(status.as_u16(), &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON: {e}"),
        })?;
        parse_completion(&json)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        generate_with_retry(&RawCall(self), prompt, self.max_retries).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Single-attempt view of the client, so retry wraps exactly one HTTP call.
struct RawCall<'a>(&'a OpenAiCompatibleModel);

#[async_trait]
impl LanguageModel for RawCall<'_> {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.0.complete_once(prompt).await
    }

    fn model_name(&self) -> &str {
        &self.0.model
    }
}

fn map_http_error(status: u16, body: &str) -> LlmError {
    match status {
        401 | 403 => {
            debug!(body = %body, status, "Authentication failed");
            LlmError::AuthFailed {
                provider: "OpenAI-compatible".to_string(),
            }
        }
        429 => {
            // "Rate limit reached ... Please try again in 7s."
            let retry_after_secs = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| {
                    v.get("error")?
                        .get("message")?
                        .as_str()
                        .map(|s| s.to_string())
                })
                .and_then(|msg| {
                    msg.split("in ").last().and_then(|s| {
                        s.trim()
                            .trim_end_matches('.')
                            .trim_end_matches('s')
                            .parse::<f64>()
                            .ok()
                    })
                })
                .map(|secs| secs.ceil() as u64)
                .unwrap_or(5);
            LlmError::RateLimited { retry_after_secs }
        }
        500..=599 => LlmError::Connection {
            message: format!("Server error {status}: {}", truncate(body, 200)),
        },
        _ => LlmError::ApiRequest {
            message: format!("HTTP {status}: {}", truncate(body, 200)),
        },
    }
}

fn parse_completion(body: &Value) -> Result<String, LlmError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No choices in response".to_string(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No message content in choice".to_string(),
        })?;

    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content.to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello" }, "finish_reason": "stop" }]
        });
        assert_eq!(parse_completion(&body).unwrap(), "Hello");
    }

    #[test]
    fn test_parse_completion_missing_choices() {
        let err = parse_completion(&json!({})).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_parse_completion_empty_content() {
        let body = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert_eq!(parse_completion(&body).unwrap_err(), LlmError::EmptyResponse);
    }

    #[test]
    fn test_map_rate_limit_with_hint() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 7s"}}"#;
        assert_eq!(
            map_http_error(429, body),
            LlmError::RateLimited {
                retry_after_secs: 7
            }
        );
    }

    #[test]
    fn test_map_rate_limit_without_hint() {
        assert_eq!(
            map_http_error(429, "slow down"),
            LlmError::RateLimited {
                retry_after_secs: 5
            }
        );
    }

    #[test]
    fn test_map_auth_and_server_errors() {
        assert!(matches!(
            map_http_error(401, ""),
            LlmError::AuthFailed { .. }
        ));
        let server = map_http_error(503, "unavailable");
        assert!(server.is_retryable());
        assert!(matches!(
            map_http_error(400, "bad"),
            LlmError::ApiRequest { .. }
        ));
    }

    #[test]
    fn test_local_endpoint_needs_no_key() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1".into(),
            api_key_env: "QUARRY_TEST_UNSET_KEY_VAR".into(),
            ..Default::default()
        };
        let model = OpenAiCompatibleModel::new(&config).unwrap();
        assert_eq!(model.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn test_remote_endpoint_requires_key() {
        let config = LlmConfig {
            api_key_env: "QUARRY_TEST_UNSET_KEY_VAR".into(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiCompatibleModel::new(&config),
            Err(LlmError::AuthFailed { .. })
        ));
    }
}
