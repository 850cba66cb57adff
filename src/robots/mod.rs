//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! The crawl loop consults a shared [`RobotsPolicyCache`] before every fetch.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsPolicyCache};
pub use parser::ParsedRobots;

use reqwest::{Client, StatusCode};

/// Fetches and parses robots.txt for an origin
///
/// Never fails. Status handling:
/// - 2xx: the body is parsed
/// - 401/403: the host forbids crawling, deny everything
/// - anything else, transport errors and unreadable bodies: allow everything
///
/// # Arguments
///
/// * `client` - HTTP client used for the request
/// * `origin` - `scheme://host[:port]` of the site
pub async fn fetch_robots(client: &Client, origin: &str) -> ParsedRobots {
    let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));

    let response = match client.get(&robots_url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Could not fetch {}: {}; allowing all", robots_url, e);
            return ParsedRobots::allow_all();
        }
    };

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        tracing::info!("{} answered {}; treating host as disallowed", robots_url, status);
        return ParsedRobots::deny_all();
    }

    if !status.is_success() {
        tracing::debug!("{} answered {}; allowing all", robots_url, status);
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            tracing::warn!("Unreadable robots.txt at {}: {}; allowing all", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
