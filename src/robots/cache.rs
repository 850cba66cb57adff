//! Robots.txt policy cache
//!
//! Policies are fetched once per origin (`scheme://host[:port]`) and kept for
//! the lifetime of the cache, or until the optional TTL expires.

use crate::config::RobotsConfig;
use crate::robots::{fetch_robots, ParsedRobots};
use crate::url::policy_key;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// Timeout for a single robots.txt request
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Cached robots.txt policy for an origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed policy (or a sentinel)
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks whether the entry is older than the given TTL
    ///
    /// An entry never goes stale when no TTL is configured.
    pub fn is_stale(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => {
                let age = Utc::now() - self.fetched_at;
                age.to_std().map(|age| age > ttl).unwrap_or(false)
            }
            None => false,
        }
    }
}

/// Per-origin robots.txt cache shared across crawl sessions
///
/// `is_allowed` never fails: any problem fetching or reading robots.txt
/// resolves to the allow-all sentinel, which is cached like a real policy.
pub struct RobotsPolicyCache {
    client: Client,
    entries: RwLock<HashMap<String, CachedRobots>>,
    ttl: Option<Duration>,
    max_hosts: usize,
}

impl RobotsPolicyCache {
    /// Creates a cache whose robots.txt requests present `user_agent`
    ///
    /// # Arguments
    ///
    /// * `config` - TTL and host-cap settings
    /// * `user_agent` - User agent sent with robots.txt requests
    pub fn new(config: &RobotsConfig, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Creates a cache around an existing HTTP client
    pub fn with_client(client: Client, config: &RobotsConfig) -> Self {
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
            ttl: config.ttl(),
            max_hosts: config.max_hosts.max(1),
        }
    }

    /// Checks whether `url` may be crawled by `user_agent`
    ///
    /// Fetches and caches the origin's robots.txt on first use.
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let key = policy_key(url);

        let cached = {
            let entries = self.entries.read().await;
            entries
                .get(&key)
                .filter(|entry| !entry.is_stale(self.ttl))
                .map(|entry| entry.content.clone())
        };

        let policy = match cached {
            Some(policy) => {
                tracing::debug!("Using cached robots.txt for {}", key);
                policy
            }
            None => {
                tracing::debug!("Fetching robots.txt for {}", key);
                let policy = fetch_robots(&self.client, &key).await;
                self.insert(key, policy.clone()).await;
                policy
            }
        };

        policy.is_allowed(url.as_str(), user_agent)
    }

    /// Number of origins currently cached
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn insert(&self, key: String, policy: ParsedRobots) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.max_hosts {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.fetched_at)
                .map(|(origin, _)| origin.clone());
            if let Some(oldest) = oldest {
                tracing::debug!("Evicting robots.txt for {}", oldest);
                entries.remove(&oldest);
            }
        }

        entries.insert(key, CachedRobots::new(policy));
    }
}
