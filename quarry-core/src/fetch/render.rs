//! Headless rendering for script-heavy pages.
//!
//! The fetcher only depends on [`PageRenderer`]. A Chromium implementation
//! is compiled with the `browser` feature:
//! ```toml
//! quarry-core = { path = "quarry-core", features = ["browser"] }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::error::FetchError;

/// Loads a URL in a real browser engine and returns the rendered HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "browser")]
mod chromium {
    use super::*;
    use futures::StreamExt;
    use std::path::PathBuf;
    use tracing::debug;

    /// Renderer backed by a headless Chrome/Chromium process.
    pub struct ChromiumRenderer {
        browser: chromiumoxide::Browser,
        _handler: tokio::task::JoinHandle<()>,
    }

    impl ChromiumRenderer {
        /// Launch a headless browser. `chrome_path` overrides binary discovery.
        pub async fn launch(chrome_path: Option<PathBuf>) -> Result<Self, FetchError> {
            let launch_err = |message: String| FetchError::Render {
                url: String::new(),
                message,
            };
            let binary = chrome_path
                .filter(|p| p.exists())
                .or_else(find_chrome_binary)
                .ok_or_else(|| launch_err("Chrome/Chromium binary not found".to_string()))?;

            let user_data_dir =
                std::env::temp_dir().join(format!("quarry-chrome-{}", uuid::Uuid::new_v4().simple()));
            let config = chromiumoxide::BrowserConfig::builder()
                .chrome_executable(binary)
                .arg("--headless=new")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-gpu")
                .arg("--disable-extensions")
                .arg("--disable-dev-shm-usage")
                .user_data_dir(user_data_dir)
                .build()
                .map_err(|e| launch_err(format!("Failed to build browser config: {e}")))?;

            let (browser, mut handler) = chromiumoxide::Browser::launch(config)
                .await
                .map_err(|e| launch_err(format!("Failed to launch Chrome: {e}")))?;

            let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

            Ok(Self {
                browser,
                _handler: handler_task,
            })
        }

        async fn render_page(&self, url: &str) -> Result<String, FetchError> {
            let render_err = |message: String| FetchError::Render {
                url: url.to_string(),
                message,
            };
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| render_err(format!("navigation failed: {e}")))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| render_err(format!("load did not finish: {e}")))?;
            let html = page
                .content()
                .await
                .map_err(|e| render_err(format!("could not read content: {e}")))?;
            if let Err(e) = page.close().await {
                debug!(url, error = %e, "Failed to close page");
            }
            Ok(html)
        }
    }

    #[async_trait]
    impl PageRenderer for ChromiumRenderer {
        async fn render(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
            tokio::time::timeout(timeout, self.render_page(url))
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })?
        }
    }

    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = if cfg!(target_os = "macos") {
            &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
            ]
        } else if cfg!(target_os = "windows") {
            &[
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            ]
        } else {
            &[
                "/usr/bin/google-chrome",
                "/usr/bin/google-chrome-stable",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/snap/bin/chromium",
            ]
        };
        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}
