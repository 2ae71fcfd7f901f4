//! Error types for the Quarry research pipeline.
//!
//! Uses `thiserror` for structured error variants covering caching, search,
//! fetching, language-model calls, the citation ledger, and configuration.
//! Components that must never fail outright (the fetcher, the aggregator,
//! controller nodes) convert these into tagged results at their boundary.

use std::path::PathBuf;

/// Top-level error type for the Quarry core library.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the TTL cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache directory unavailable: {path}: {message}")]
    Directory { path: PathBuf, message: String },

    #[error("Failed to write cache entry {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Failed to encode cache payload: {message}")]
    Encode { message: String },
}

/// Errors from a single search engine request.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{engine} request failed: {message}")]
    Request { engine: String, message: String },

    #[error("{engine} returned HTTP {status}")]
    Status { engine: String, status: u16 },

    #[error("{engine} response could not be parsed: {message}")]
    Parse { engine: String, message: String },

    #[error("{engine} timed out after {timeout_secs}s")]
    Timeout { engine: String, timeout_secs: u64 },

    #[error("{engine} blocked the request: {reason}")]
    Blocked { engine: String, reason: String },
}

impl SearchError {
    /// Whether another attempt against the same engine may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Request { .. } | SearchError::Timeout { .. } => true,
            SearchError::Status { status, .. } => *status == 429 || *status >= 500,
            SearchError::Parse { .. } | SearchError::Blocked { .. } => false,
        }
    }
}

/// Errors from fetching and extracting a single page.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Disallowed by robots.txt: {url}")]
    RobotsDisallowed { url: String },

    #[error("Fetch already in progress: {url}")]
    AlreadyInFlight { url: String },

    #[error("Timed out after {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Connection failed for {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Unsupported content type '{content_type}' at {url}")]
    UnsupportedContent { url: String, content_type: String },

    #[error("Human verification challenge at {url}: {reason}")]
    Challenge { url: String, reason: String },

    #[error("Renderer failed for {url}: {message}")]
    Render { url: String, message: String },

    #[error("No extractable content at {url}")]
    EmptyContent { url: String },

    #[error("Batch deadline exceeded before {url} completed")]
    BatchTimeout { url: String },
}

impl FetchError {
    /// Whether another attempt at the same URL may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connection { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from language model interactions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. }
        )
    }
}

/// Errors from the citation ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Unknown citation id: {id}")]
    UnknownCitation { id: u32 },

    #[error("Ledger import failed: {message}")]
    Import { message: String },

    #[error("Ledger file error at {path}: {message}")]
    File { path: PathBuf, message: String },
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Missing API key: set the {env_var} environment variable")]
    MissingApiKey { env_var: String },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

/// Convenience type alias for results using `QuarryError`.
pub type Result<T> = std::result::Result<T, QuarryError>;
