//! Output module for inspecting harvested data
//!
//! This module handles:
//! - Exporting staged records to CSV or JSON
//! - Loading and printing queue, staging, catalog and session statistics

mod export;
pub mod stats;

pub use export::{export_staging, ExportFormat};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
