//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{QueueStatus, StagingStatus};
use crate::storage::{
    CandidateRecord, CatalogProduct, NewProduct, QueueEntry, SessionCounters, SessionRecord,
    SessionStatus, SessionTrigger, StagingRecord,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid queue transition for {url}: {from} -> {to}")]
    InvalidTransition {
        url: String,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| e.to_string()),
                )
            }
            _ => StorageError::Sqlite(err),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the crawl loop, the
/// catalog merge and the reporting commands.
pub trait Storage {
    // ===== Crawl Queue =====

    /// Inserts a pending entry unless the URL is already queued
    ///
    /// # Returns
    ///
    /// `true` if a row was created
    fn insert_queue_entry_if_absent(&mut self, url: &str) -> StorageResult<bool>;

    /// Gets a queue entry by URL
    fn get_queue_entry(&self, url: &str) -> StorageResult<Option<QueueEntry>>;

    /// Atomically moves the oldest pending entry to in_progress and returns it
    fn claim_next_pending(&mut self) -> StorageResult<Option<QueueEntry>>;

    /// Moves an entry from `from` to `to`, only if it is currently in `from`
    ///
    /// Fails with `InvalidTransition` when the entry is in another state and
    /// with `NotFound` when it does not exist.
    fn transition_queue_entry(
        &mut self,
        url: &str,
        from: QueueStatus,
        to: QueueStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Moves every entry in `from` to `to`, returning how many moved
    fn transition_all_queue_entries(
        &mut self,
        from: QueueStatus,
        to: QueueStatus,
    ) -> StorageResult<usize>;

    /// Counts queue entries per status
    fn count_queue_by_status(&self) -> StorageResult<HashMap<QueueStatus, u64>>;

    // ===== Staging =====

    /// Gets a staged record by source URL
    fn get_staging_record(&self, source_url: &str) -> StorageResult<Option<StagingRecord>>;

    /// Inserts a new staged record with status raw
    fn insert_staging_record(&mut self, record: &CandidateRecord) -> StorageResult<i64>;

    /// Overwrites a staged record, resetting status to raw
    fn update_staging_record(&mut self, record: &CandidateRecord) -> StorageResult<i64>;

    /// Sets the status and error message of a staged record
    fn set_staging_status(
        &mut self,
        source_url: &str,
        status: StagingStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Lists all staged records ordered by id
    fn list_staging_records(&self) -> StorageResult<Vec<StagingRecord>>;

    /// Counts staged records per status
    fn count_staging_by_status(&self) -> StorageResult<HashMap<StagingStatus, u64>>;

    // ===== Catalog =====

    /// Opens a named savepoint
    fn savepoint(&mut self, name: &str) -> StorageResult<()>;

    /// Releases (commits) a named savepoint
    fn release_savepoint(&mut self, name: &str) -> StorageResult<()>;

    /// Rolls back to and releases a named savepoint
    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()>;

    fn find_brand_by_name(&self, name: &str) -> StorageResult<Option<i64>>;

    fn insert_brand(&mut self, name: &str) -> StorageResult<i64>;

    fn find_category_by_name(&self, name: &str) -> StorageResult<Option<i64>>;

    fn insert_category(&mut self, name: &str) -> StorageResult<i64>;

    /// Looks up a catalog product by its source URL
    fn find_product_by_source_url(&self, source_url: &str)
        -> StorageResult<Option<CatalogProduct>>;

    fn insert_product(&mut self, product: &NewProduct<'_>) -> StorageResult<i64>;

    fn insert_product_image(
        &mut self,
        product_id: i64,
        image_url: &str,
        is_primary: bool,
    ) -> StorageResult<()>;

    fn insert_inventory(&mut self, product_id: i64, quantity: u32) -> StorageResult<()>;

    /// Replaces the inventory quantity of a product
    fn set_inventory_quantity(&mut self, product_id: i64, quantity: u32) -> StorageResult<()>;

    /// Gets a catalog product with its primary image and stock level
    fn get_product(&self, product_id: i64) -> StorageResult<CatalogProduct>;

    fn count_products(&self) -> StorageResult<u64>;

    fn count_brands(&self) -> StorageResult<u64>;

    fn count_categories(&self) -> StorageResult<u64>;

    fn count_product_images(&self) -> StorageResult<u64>;

    // ===== Session Ledger =====

    /// Records the start of a crawl session
    ///
    /// # Returns
    ///
    /// The ID of the new session
    fn create_session(
        &mut self,
        trigger: SessionTrigger,
        seed_url: &str,
        url_limit: u32,
        config_hash: &str,
    ) -> StorageResult<i64>;

    /// Marks a session finished with its final counters
    fn finish_session(
        &mut self,
        session_id: i64,
        status: SessionStatus,
        counters: SessionCounters,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    fn get_session(&self, session_id: i64) -> StorageResult<SessionRecord>;

    /// Gets the most recent sessions, newest first
    fn list_recent_sessions(&self, limit: u32) -> StorageResult<Vec<SessionRecord>>;
}
