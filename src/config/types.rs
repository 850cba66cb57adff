use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Listing-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    pub stock: StockConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// Which page fetcher backend a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// Headless Chrome; waits for the content marker to render
    Browser,
    /// Plain HTTP GET; the marker must be present in the served markup
    Http,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// User agent presented by the browser and the robots.txt client
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Pause before every fetch attempt (milliseconds)
    #[serde(rename = "politeness-delay-ms", default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,

    /// How long to wait for the content marker to appear (seconds)
    #[serde(rename = "render-timeout-secs", default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    /// CSS selector whose presence means the listing has rendered
    #[serde(rename = "content-marker", default = "default_content_marker")]
    pub content_marker: String,

    /// URL budget used when a trigger does not specify one
    #[serde(rename = "default-limit", default = "default_limit")]
    pub default_limit: u32,

    /// Period of the recurring crawl in `--schedule` mode (seconds)
    #[serde(rename = "schedule-interval-secs", default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,

    #[serde(default = "default_fetcher")]
    pub fetcher: FetcherKind,
}

/// Robots.txt cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RobotsConfig {
    /// Refetch policies older than this (seconds); 0 keeps them for the process lifetime
    #[serde(rename = "ttl-secs", default)]
    pub ttl_secs: u64,

    /// Maximum number of hosts kept in the cache
    #[serde(rename = "max-hosts", default = "default_max_hosts")]
    pub max_hosts: usize,
}

/// Bounds for the randomized inventory quantity
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StockConfig {
    pub min: u32,
    pub max: u32,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Downstream batch notification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_endpoint")]
    pub endpoint: String,

    #[serde(rename = "timeout-secs", default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CrawlerConfig {
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }
}

impl RobotsConfig {
    /// Returns the cache TTL, or `None` when policies live for the whole process
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            max_hosts: default_max_hosts(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_notification_endpoint(),
            timeout_secs: default_notification_timeout_secs(),
            enabled: true,
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_politeness_delay_ms() -> u64 {
    3000
}

fn default_render_timeout_secs() -> u64 {
    20
}

fn default_content_marker() -> String {
    ".pi__core".to_string()
}

fn default_limit() -> u32 {
    50
}

fn default_schedule_interval_secs() -> u64 {
    3600
}

fn default_fetcher() -> FetcherKind {
    FetcherKind::Browser
}

fn default_max_hosts() -> usize {
    256
}

fn default_notification_endpoint() -> String {
    "http://10.0.2.2:8080/api/new_product_batch".to_string()
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}
