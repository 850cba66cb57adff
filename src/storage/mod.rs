//! Storage module for persisting crawl and catalog data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - The crawl queue and its state transitions
//! - Staged product records
//! - The canonical catalog (brands, products, images, inventory)
//! - The crawl session ledger

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{QueueStatus, StagingStatus};
use crate::HarvestError;
use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::path::Path;

/// Opens (creating if needed) the SQLite database at `path`
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Current time as stored in the database
///
/// Fixed microsecond precision keeps lexical order equal to chronological
/// order, which queue ordering relies on.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One crawl target and its processing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub url: String,
    pub status: QueueStatus,
    pub added_at: String,
    pub error_message: Option<String>,
}

/// A product observation extracted from a listing page, before staging
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub source_url: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub additional_data: Map<String, Value>,
}

/// A staged product record as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRecord {
    pub id: i64,
    pub source_url: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub extracted_at: String,
    pub status: StagingStatus,
    pub error_message: Option<String>,
    pub additional_data: Map<String, Value>,
}

/// Fields of a catalog product created from a staged record
#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub price: Decimal,
    pub category_id: Option<i64>,
    pub brand_id: Option<i64>,
    /// Absent for products that were not scraped
    pub source_url: Option<&'a str>,
}

/// A canonical catalog product with its primary image and stock level
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogProduct {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub category_id: Option<i64>,
    pub brand_id: Option<i64>,
    pub source_url: Option<String>,
    pub primary_image_url: Option<String>,
    pub stock: u32,
}

/// What started a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTrigger {
    OnDemand,
    Scheduled,
    Cli,
}

impl SessionTrigger {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::OnDemand => "on_demand",
            Self::Scheduled => "scheduled",
            Self::Cli => "cli",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "on_demand" => Some(Self::OnDemand),
            "scheduled" => Some(Self::Scheduled),
            "cli" => Some(Self::Cli),
            _ => None,
        }
    }
}

/// Status of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Counters written when a session finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub urls_processed: u32,
    pub urls_failed: u32,
    pub products_ingested: u32,
}

/// A row of the session ledger
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub trigger: SessionTrigger,
    pub seed_url: String,
    pub url_limit: u32,
    pub config_hash: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: SessionStatus,
    pub counters: SessionCounters,
    pub error_message: Option<String>,
}
