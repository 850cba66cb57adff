//! Crawler module for listing pages
//!
//! This module contains the crawl pipeline, including:
//! - Page fetching through a headless browser or plain HTTP
//! - Product card extraction and pagination discovery
//! - The persistent work queue
//! - Session orchestration and the background worker

mod browser;
mod extractor;
mod fetcher;
mod orchestrator;
mod pagination;
mod queue;
mod worker;

pub use browser::BrowserFetcher;
pub use extractor::{clean_price, extract_listings};
pub use fetcher::{build_fetcher, FetchError, FetcherFactory, HttpFetcher, PageFetcher};
pub use orchestrator::{CrawlOrchestrator, SessionSummary};
pub use pagination::discover_links;
pub use queue::QueueManager;
pub use worker::{Accepted, CrawlHandle, CrawlJob, CrawlWorker, TriggerError};
