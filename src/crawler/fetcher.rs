//! Page fetcher abstraction and the plain HTTP backend
//!
//! A fetch returns the page markup once the configured content marker is
//! present, or a classified failure. Every backend waits for the politeness
//! delay before each attempt.

use crate::config::{CrawlerConfig, FetcherKind};
use crate::crawler::browser::BrowserFetcher;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failure of a single fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// The content marker never appeared within the render timeout
    #[error("Timed out after {waited:?} waiting for content at {url}")]
    Timeout { url: String, waited: Duration },

    /// Network failure or non-success HTTP status
    #[error("Transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// The fetcher backend itself is unusable; ends the session
    #[error("Browser unavailable: {0}")]
    Browser(String),
}

impl FetchError {
    /// Returns true if the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Browser(_))
    }

    /// Short reason recorded on the failed queue entry
    pub fn queue_reason(&self) -> String {
        match self {
            Self::Timeout { .. } => "timeout".to_string(),
            Self::Transport { message, .. } => format!("transport-error: {}", message),
            Self::Browser(message) => format!("browser-error: {}", message),
        }
    }
}

/// A backend that loads listing pages
#[async_trait]
pub trait PageFetcher: Send {
    /// Loads `url` and returns its markup once the content marker is present
    async fn fetch(&mut self, url: &Url) -> Result<String, FetchError>;

    /// Releases backend resources; the fetcher must not be used afterwards
    async fn shutdown(&mut self);
}

/// Builds the fetcher for one session from the crawler settings
pub type FetcherFactory =
    Box<dyn Fn(&CrawlerConfig) -> Result<Box<dyn PageFetcher>, FetchError> + Send + Sync>;

/// Creates the fetcher configured for a session
pub fn build_fetcher(config: &CrawlerConfig) -> Result<Box<dyn PageFetcher>, FetchError> {
    match config.fetcher {
        FetcherKind::Browser => Ok(Box::new(BrowserFetcher::new(config)?)),
        FetcherKind::Http => Ok(Box::new(HttpFetcher::new(config)?)),
    }
}

/// Parses the configured content marker selector
pub(crate) fn parse_marker(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css)
        .map_err(|e| FetchError::Browser(format!("invalid content marker '{}': {}", css, e)))
}

/// Returns true if `markup` contains an element matching `marker`
pub(crate) fn contains_marker(markup: &str, marker: &Selector) -> bool {
    let document = Html::parse_document(markup);
    let found = document.select(marker).next().is_some();
    found
}

/// Fetches pages with a plain HTTP GET
///
/// Nothing is rendered, so the marker must already be present in the served
/// markup; markup without it is reported as a timeout.
pub struct HttpFetcher {
    client: Client,
    marker: Selector,
    politeness_delay: Duration,
    render_timeout: Duration,
}

impl HttpFetcher {
    /// Builds an HTTP fetcher
    ///
    /// # Arguments
    ///
    /// * `config` - Crawler settings (user agent, delays, marker)
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.render_timeout())
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Browser(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            marker: parse_marker(&config.content_marker)?,
            politeness_delay: config.politeness_delay(),
            render_timeout: config.render_timeout(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&mut self, url: &Url) -> Result<String, FetchError> {
        tokio::time::sleep(self.politeness_delay).await;
        tracing::debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    waited: self.render_timeout,
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !contains_marker(&body, &self.marker) {
            return Err(FetchError::Timeout {
                url: url.to_string(),
                waited: self.render_timeout,
            });
        }

        Ok(body)
    }

    async fn shutdown(&mut self) {}
}
