//! State module for tracking crawl and ingestion progress
//!
//! # Components
//!
//! - `QueueStatus`: the crawl queue state machine (pending, in_progress, completed, failed)
//! - `StagingStatus`: lifecycle of a staged product record (raw, processed, error)

mod queue_status;
mod staging_status;

// Re-export main types
pub use queue_status::QueueStatus;
pub use staging_status::StagingStatus;
