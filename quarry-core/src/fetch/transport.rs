use async_trait::async_trait;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::search::random_user_agent;

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain GET with a per-request timeout. Mocked in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let build_err = |message: String| FetchError::Connection {
            url: String::new(),
            message,
        };
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(Duration::from_secs(config.min_timeout_secs.max(1)));
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| build_err(format!("Invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| build_err(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string());
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                FetchError::Connection {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .header("User-Agent", user_agent)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.5",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.text().await.map_err(map_err)?;

        Ok(HttpResponse {
            status,
            final_url,
            content_type,
            body,
        })
    }
}
