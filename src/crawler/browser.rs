//! Headless Chrome page fetcher
//!
//! The browser is launched lazily on the first fetch and lives until
//! `shutdown`, so one browser serves one crawl session.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::{FetchError, PageFetcher};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// How often the marker selector is polled while waiting for render
const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(user_agent: &str) -> Result<Self, FetchError> {
        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", user_agent))
            .build()
            .map_err(FetchError::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        // The CDP connection only makes progress while its handler is polled
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        tracing::info!("Launched headless browser");
        Ok(Self { browser, handler })
    }
}

/// Fetches pages through headless Chrome
pub struct BrowserFetcher {
    user_agent: String,
    marker: String,
    politeness_delay: Duration,
    render_timeout: Duration,
    session: Option<BrowserSession>,
}

impl BrowserFetcher {
    /// Creates a fetcher; the browser itself starts on first use
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        // Reject a bad selector before launching anything
        crate::crawler::fetcher::parse_marker(&config.content_marker)?;

        Ok(Self {
            user_agent: config.user_agent.clone(),
            marker: config.content_marker.clone(),
            politeness_delay: config.politeness_delay(),
            render_timeout: config.render_timeout(),
            session: None,
        })
    }

    async fn browser(&mut self) -> Result<&Browser, FetchError> {
        if self.session.is_none() {
            self.session = Some(BrowserSession::launch(&self.user_agent).await?);
        }
        self.session
            .as_ref()
            .map(|session| &session.browser)
            .ok_or_else(|| FetchError::Browser("browser is not running".to_string()))
    }

    async fn load(&self, page: &Page, url: &Url, deadline: Instant) -> Result<String, FetchError> {
        let timeout = || FetchError::Timeout {
            url: url.to_string(),
            waited: self.render_timeout,
        };

        tokio::time::timeout_at(deadline, page.goto(url.as_str()))
            .await
            .map_err(|_| timeout())?
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        loop {
            if page.find_element(self.marker.as_str()).await.is_ok() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(timeout());
            }
            tokio::time::sleep(MARKER_POLL_INTERVAL).await;
        }

        page.content().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&mut self, url: &Url) -> Result<String, FetchError> {
        tokio::time::sleep(self.politeness_delay).await;
        tracing::debug!("Rendering {}", url);

        let page = self
            .browser()
            .await?
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Browser(format!("could not open tab: {}", e)))?;

        let deadline = Instant::now() + self.render_timeout;
        let result = self.load(&page, url, deadline).await;

        if let Err(e) = page.close().await {
            tracing::warn!("Failed to close tab for {}: {}", url, e);
        }

        result
    }

    async fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Err(e) = session.browser.close().await {
            tracing::warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = session.browser.wait().await {
            tracing::warn!("Failed waiting for browser exit: {}", e);
        }
        if let Err(e) = session.handler.await {
            tracing::warn!("Browser handler task failed: {}", e);
        }
        tracing::info!("Browser shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_marker() {
        let mut config: CrawlerConfig = toml::from_str("").unwrap();
        config.content_marker = "div[".to_string();
        assert!(matches!(
            BrowserFetcher::new(&config),
            Err(FetchError::Browser(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_without_launch_is_noop() {
        let config: CrawlerConfig = toml::from_str("").unwrap();
        let mut fetcher = BrowserFetcher::new(&config).unwrap();
        fetcher.shutdown().await;
        assert!(fetcher.session.is_none());
    }
}
