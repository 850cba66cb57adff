use crate::config::types::{Config, CrawlerConfig, NotificationConfig, RobotsConfig, StockConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_robots_config(&config.robots)?;
    validate_stock_config(&config.stock)?;
    validate_storage_config(&config.storage)?;
    validate_notification_config(&config.notification)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.render_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "render_timeout_secs must be >= 1, got {}",
            config.render_timeout_secs
        )));
    }

    if config.content_marker.trim().is_empty() {
        return Err(ConfigError::Validation(
            "content_marker cannot be empty".to_string(),
        ));
    }

    if scraper::Selector::parse(&config.content_marker).is_err() {
        return Err(ConfigError::Validation(format!(
            "content_marker '{}' is not a valid CSS selector",
            config.content_marker
        )));
    }

    if config.default_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "default_limit must be >= 1, got {}",
            config.default_limit
        )));
    }

    if config.schedule_interval_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "schedule_interval_secs must be >= 1, got {}",
            config.schedule_interval_secs
        )));
    }

    Ok(())
}

fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.max_hosts < 1 {
        return Err(ConfigError::Validation(format!(
            "robots max_hosts must be >= 1, got {}",
            config.max_hosts
        )));
    }
    Ok(())
}

/// Validates the random stock range
fn validate_stock_config(config: &StockConfig) -> Result<(), ConfigError> {
    if config.min > config.max {
        return Err(ConfigError::Validation(format!(
            "stock min ({}) must not exceed stock max ({})",
            config.min, config.max
        )));
    }
    Ok(())
}

fn validate_storage_config(config: &crate::config::types::StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates the notification endpoint when notifications are enabled
fn validate_notification_config(config: &NotificationConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid notification endpoint: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Notification endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "notification timeout_secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}
