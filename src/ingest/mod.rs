//! Ingestion of extracted products
//!
//! # Components
//!
//! - `StagingStore`: upserts raw extracted records keyed by source URL
//! - `CatalogMerger`: promotes a staged record into the canonical catalog
//! - `import_catalog_csv`: loads a CSV product file directly into the catalog
//! - `Notifier`: sends the batch of ingested products downstream

mod catalog;
mod import;
mod notify;
mod staging;

pub use catalog::{CatalogMerger, ImportOutcome, ImportRow};
pub use import::{import_catalog_csv, ImportSummary, DEFAULT_CATEGORY};
pub use notify::{
    build_notifier, HttpNotifier, NoopNotifier, NotificationOutcome, Notifier,
    ProductNotification,
};
pub use staging::StagingStore;

use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while merging a record into the catalog
#[derive(Debug, Error)]
pub enum IngestError {
    /// A uniqueness or integrity rule rejected the record; its writes were rolled back
    #[error("Integrity violation ingesting {source_url}: {message}")]
    Integrity { source_url: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Returns true if the crawl can continue with the next record
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}
