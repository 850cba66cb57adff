//! Statistics from the harvest database
//!
//! This module provides functionality for extracting and displaying queue,
//! staging, catalog and session statistics from the storage layer.

use crate::state::{QueueStatus, StagingStatus};
use crate::storage::{SessionRecord, Storage};
use crate::HarvestError;
use std::collections::HashMap;

/// Number of recent sessions shown by `--stats`
const RECENT_SESSIONS: u32 = 5;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Count of queue entries by status
    pub queue_by_status: HashMap<QueueStatus, u64>,

    /// Count of staging records by status
    pub staging_by_status: HashMap<StagingStatus, u64>,

    pub products: u64,
    pub brands: u64,
    pub categories: u64,
    pub product_images: u64,

    /// Most recent sessions, newest first
    pub recent_sessions: Vec<SessionRecord>,
}

impl HarvestStatistics {
    pub fn total_queue_entries(&self) -> u64 {
        self.queue_by_status.values().sum()
    }

    pub fn total_staging_records(&self) -> u64 {
        self.staging_by_status.values().sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        queue_by_status: storage.count_queue_by_status()?,
        staging_by_status: storage.count_staging_by_status()?,
        products: storage.count_products()?,
        brands: storage.count_brands()?,
        categories: storage.count_categories()?,
        product_images: storage.count_product_images()?,
        recent_sessions: storage.list_recent_sessions(RECENT_SESSIONS)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    let total_queue = stats.total_queue_entries();
    println!("Crawl Queue ({} entries):", total_queue);
    for status in QueueStatus::all_states() {
        let count = stats.queue_by_status.get(&status).copied().unwrap_or(0);
        let percentage = if total_queue > 0 {
            (count as f64 / total_queue as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    println!("Staging ({} records):", stats.total_staging_records());
    for status in [StagingStatus::Raw, StagingStatus::Processed, StagingStatus::Error] {
        let count = stats.staging_by_status.get(&status).copied().unwrap_or(0);
        println!("  {}: {}", status.to_db_string(), count);
    }
    println!();

    println!("Catalog:");
    println!("  Products: {}", stats.products);
    println!("  Brands: {}", stats.brands);
    println!("  Categories: {}", stats.categories);
    println!("  Images: {}", stats.product_images);
    println!();

    if stats.recent_sessions.is_empty() {
        println!("No crawl sessions recorded");
        return;
    }

    println!("Recent Sessions:");
    for session in &stats.recent_sessions {
        println!(
            "  #{} [{}] {} {} (limit {}): {} processed, {} failed, {} products",
            session.id,
            session.status.to_db_string(),
            session.trigger.to_db_string(),
            session.seed_url,
            session.url_limit,
            session.counters.urls_processed,
            session.counters.urls_failed,
            session.counters.products_ingested
        );
        println!(
            "      started {} finished {}",
            session.started_at,
            session.finished_at.as_deref().unwrap_or("-")
        );
        if let Some(error) = &session.error_message {
            println!("      error: {}", error);
        }
    }
}
