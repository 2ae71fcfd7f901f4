//! Configuration system for Quarry.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files live at
//! `~/.config/quarry/config.toml` and `<workspace>/.quarry/config.toml`;
//! environment variables use the `QUARRY_` prefix with `__` between sections
//! (`QUARRY_SEARCH__MAX_RESULTS=20`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::citation::CitationStyle;
use crate::error::ConfigError;
use crate::search::{MergeStrategy, SearchEngine};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub fetch: FetchConfig,
    pub research: ResearchConfig,
    pub cache: CacheConfig,
}

/// Language model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (OpenAI, Ollama, vLLM, LM Studio).
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    /// Retries on transient errors (rate limit, timeout, connection).
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 4096,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Search aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Engines queried when the caller does not name any.
    pub engines: Vec<SearchEngine>,
    pub max_results: usize,
    /// Upper bound on concurrent outbound search requests.
    pub max_concurrent: usize,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    /// Upper bound of the random delay before each request.
    pub jitter_ms: u64,
    pub request_timeout_secs: u64,
    pub merge_strategy: MergeStrategy,
    pub cache_ttl_secs: u64,
    /// Fixed user agent; a random desktop agent is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engines: vec![SearchEngine::DuckDuckGo, SearchEngine::Wikipedia],
            max_results: 10,
            max_concurrent: 5,
            retry_attempts: 3,
            backoff_base_ms: 500,
            jitter_ms: 250,
            request_timeout_secs: 15,
            merge_strategy: MergeStrategy::Alternate,
            cache_ttl_secs: 24 * 60 * 60,
            user_agent: None,
        }
    }
}

impl SearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Web fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_concurrent: usize,
    pub respect_robots: bool,
    pub robots_ttl_secs: u64,
    /// Timeout for domains with no latency history.
    pub default_timeout_secs: u64,
    pub min_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub max_retries: u32,
    /// Overall deadline for a `fetch_many` batch.
    pub batch_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    /// Extracted text longer than this is clipped at a paragraph boundary.
    pub max_text_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Domains that never go through the headless renderer.
    pub dynamic_denylist: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            respect_robots: true,
            robots_ttl_secs: 60 * 60,
            default_timeout_secs: 15,
            min_timeout_secs: 5,
            max_timeout_secs: 30,
            max_retries: 2,
            batch_timeout_secs: 90,
            cache_ttl_secs: 7 * 24 * 60 * 60,
            max_text_chars: 30_000,
            proxy: None,
            user_agent: None,
            dynamic_denylist: default_dynamic_denylist(),
        }
    }
}

fn default_dynamic_denylist() -> Vec<String> {
    [
        "wikipedia.org",
        "arxiv.org",
        "github.com",
        "stackoverflow.com",
        "docs.python.org",
        "doc.rust-lang.org",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Research controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub default_depth: u32,
    pub default_breadth: u32,
    pub max_depth: u32,
    pub max_breadth: u32,
    /// URLs fetched per sub-query after relevance filtering.
    pub max_urls_per_query: usize,
    /// Hard ceiling on Search passes regardless of depth.
    pub max_iterations: u32,
    /// Above this many fetched sources, the model picks which to cite.
    pub source_selection_limit: usize,
    pub citation_style: CitationStyle,
    /// Use the headless renderer for page fetches.
    pub dynamic_fetch: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_depth: 2,
            default_breadth: 4,
            max_depth: 5,
            max_breadth: 10,
            max_urls_per_query: 3,
            max_iterations: 12,
            source_selection_limit: 25,
            citation_style: CitationStyle::Apa,
            dynamic_fetch: false,
        }
    }
}

/// Cache settings shared by search and fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache root. Defaults to the platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl CacheConfig {
    /// Resolved cache root: the configured dir, else the platform cache dir.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "quarry", "quarry")
                .map(|d| d.cache_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".quarry").join("cache"))
        })
    }
}

impl QuarryConfig {
    /// Check values that would otherwise produce a stuck or degenerate run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.max_concurrent == 0 {
            return Err(invalid("search.max_concurrent", "must be at least 1"));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(invalid("fetch.max_concurrent", "must be at least 1"));
        }
        if self.fetch.min_timeout_secs > self.fetch.max_timeout_secs {
            return Err(invalid(
                "fetch.min_timeout_secs",
                "must not exceed fetch.max_timeout_secs",
            ));
        }
        if self.research.max_iterations == 0 {
            return Err(invalid("research.max_iterations", "must be at least 1"));
        }
        if self.research.max_breadth == 0 {
            return Err(invalid("research.max_breadth", "must be at least 1"));
        }
        if self.search.engines.is_empty() {
            return Err(invalid("search.engines", "at least one engine is required"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "quarry", "quarry")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".quarry").join("config.toml")
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&QuarryConfig>,
) -> Result<QuarryConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(QuarryConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed("QUARRY_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Write a default config file to `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let body = toml::to_string_pretty(&QuarryConfig::default()).map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    crate::persistence::atomic_write(path, body.as_bytes()).map_err(|e| ConfigError::Load {
        message: format!("{}: {e}", path.display()),
    })
}
