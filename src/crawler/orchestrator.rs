//! Crawl orchestration
//!
//! Drives one crawl session: claims queue entries until the URL budget or the
//! queue runs out, checks robots.txt, fetches and extracts each listing page,
//! stages and merges the products, queues pagination links, and finally
//! notifies downstream of everything ingested.
//!
//! Per-URL problems (policy denial, fetch failure) fail only that entry and
//! per-record integrity problems drop only that record. Anything else aborts
//! the session, which is then reported as failed rather than returned as an
//! error.

use crate::config::{load_config_with_hash, Config};
use crate::crawler::extractor::extract_listings;
use crate::crawler::fetcher::{build_fetcher, FetcherFactory, PageFetcher};
use crate::crawler::pagination::discover_links;
use crate::crawler::queue::QueueManager;
use crate::ingest::{CatalogMerger, NotificationOutcome, Notifier, ProductNotification, StagingStore};
use crate::robots::RobotsPolicyCache;
use crate::storage::{
    CatalogProduct, QueueEntry, SessionCounters, SessionStatus, SessionTrigger, Storage,
};
use crate::url::parse_crawl_url;
use crate::HarvestError;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Outcome of one crawl session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Row id in the session ledger, if the session could be recorded
    pub session_id: Option<i64>,
    pub seed_url: String,
    pub trigger: SessionTrigger,
    /// Entries completed; only these count toward the URL budget
    pub urls_processed: u32,
    pub urls_failed: u32,
    pub products_ingested: u32,
    pub notification: NotificationOutcome,
    pub status: SessionStatus,
    /// Why the session aborted
    pub error: Option<String>,
}

#[derive(Default)]
struct SessionProgress {
    counters: SessionCounters,
    ingested: Vec<CatalogProduct>,
    current: Option<QueueEntry>,
}

/// Runs crawl sessions against a storage backend
pub struct CrawlOrchestrator<S: Storage> {
    storage: S,
    config: Arc<Config>,
    config_hash: String,
    robots: Arc<RobotsPolicyCache>,
    notifier: Arc<dyn Notifier>,
    fetcher_factory: FetcherFactory,
    /// Re-read before every session when set
    config_path: Option<PathBuf>,
}

impl<S: Storage> CrawlOrchestrator<S> {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `storage` - Database holding the queue, staging area and catalog
    /// * `config` - Loaded configuration
    /// * `config_hash` - Hash recorded with every session
    /// * `robots` - Shared robots.txt cache
    /// * `notifier` - Downstream batch notifier
    pub fn new(
        storage: S,
        config: Arc<Config>,
        config_hash: String,
        robots: Arc<RobotsPolicyCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            config,
            config_hash,
            robots,
            notifier,
            fetcher_factory: Box::new(build_fetcher),
            config_path: None,
        }
    }

    /// Replaces the fetcher backend chosen from the configuration
    pub fn with_fetcher_factory(mut self, factory: FetcherFactory) -> Self {
        self.fetcher_factory = factory;
        self
    }

    /// Reloads the configuration from `path` at the start of every session
    ///
    /// Crawler and stock settings take effect on the next session. The
    /// database, robots cache and notifier keep the settings they were built
    /// with. A file that no longer loads is logged and the previous
    /// configuration is kept.
    pub fn with_config_reload(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Runs one crawl session starting from `seed`
    ///
    /// Never fails: an aborted session is reported through
    /// `SessionSummary::status` and `SessionSummary::error`.
    ///
    /// # Arguments
    ///
    /// * `seed` - Listing URL to (re)enqueue before crawling
    /// * `max_urls` - Maximum number of entries to complete
    /// * `trigger` - What started the session, for the ledger
    pub async fn run(&mut self, seed: &Url, max_urls: u32, trigger: SessionTrigger) -> SessionSummary {
        tracing::info!(
            "Starting {} crawl session from {} (limit {})",
            trigger.to_db_string(),
            seed,
            max_urls
        );

        self.reload_config();

        let session_id =
            match self
                .storage
                .create_session(trigger, seed.as_str(), max_urls, &self.config_hash)
            {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!("Could not record crawl session: {}", e);
                    None
                }
            };

        let mut progress = SessionProgress::default();
        let result = match (self.fetcher_factory)(&self.config.crawler) {
            Ok(mut fetcher) => {
                let result = self
                    .crawl(fetcher.as_mut(), seed, max_urls, &mut progress)
                    .await;
                fetcher.shutdown().await;
                result
            }
            Err(e) => Err(HarvestError::from(e)),
        };

        progress.counters.products_ingested = progress.ingested.len() as u32;

        let (status, error, notification) = match result {
            Ok(()) => {
                let notifier = Arc::clone(&self.notifier);
                let notification =
                    dispatch_notification(notifier.as_ref(), &progress.ingested).await;
                (SessionStatus::Completed, None, notification)
            }
            Err(e) => {
                tracing::error!("Crawl session aborted: {}", e);
                if let Some(entry) = progress.current.take() {
                    let reason = format!("aborted: {}", e);
                    if let Err(mark) = QueueManager::new(&mut self.storage).mark_failed(&entry, &reason)
                    {
                        tracing::warn!("Could not mark {} failed after abort: {}", entry.url, mark);
                    } else {
                        progress.counters.urls_failed += 1;
                    }
                }
                (
                    SessionStatus::Failed,
                    Some(e.to_string()),
                    NotificationOutcome::Skipped,
                )
            }
        };

        if let Some(id) = session_id {
            if let Err(e) =
                self.storage
                    .finish_session(id, status, progress.counters, error.as_deref())
            {
                tracing::error!("Could not finish crawl session {}: {}", id, e);
            }
        }

        let summary = SessionSummary {
            session_id,
            seed_url: seed.to_string(),
            trigger,
            urls_processed: progress.counters.urls_processed,
            urls_failed: progress.counters.urls_failed,
            products_ingested: progress.counters.products_ingested,
            notification,
            status,
            error,
        };

        tracing::info!(
            "Crawl session finished ({}): {} URLs processed, {} failed, {} products ingested",
            summary.status.to_db_string(),
            summary.urls_processed,
            summary.urls_failed,
            summary.products_ingested
        );

        summary
    }

    async fn crawl(
        &mut self,
        fetcher: &mut dyn PageFetcher,
        seed: &Url,
        max_urls: u32,
        progress: &mut SessionProgress,
    ) -> Result<(), HarvestError> {
        QueueManager::new(&mut self.storage).reactivate(seed.as_str())?;

        let mut merger = CatalogMerger::new(self.config.stock);
        let user_agent = self.config.crawler.user_agent.clone();

        while progress.counters.urls_processed < max_urls {
            let Some(entry) = QueueManager::new(&mut self.storage).claim_next()? else {
                tracing::info!("Queue exhausted");
                break;
            };
            progress.current = Some(entry.clone());
            tracing::debug!("Processing {}", entry.url);

            let url = match parse_crawl_url(&entry.url) {
                Ok(url) => url,
                Err(e) => {
                    self.fail_entry(&entry, &format!("invalid-url: {}", e), progress)?;
                    continue;
                }
            };

            if !self.robots.is_allowed(&url, &user_agent).await {
                tracing::info!("{} disallowed by robots.txt", url);
                self.fail_entry(&entry, "policy-disallowed", progress)?;
                continue;
            }

            let markup = match fetcher.fetch(&url).await {
                Ok(markup) => markup,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("{}", e);
                    self.fail_entry(&entry, &e.queue_reason(), progress)?;
                    continue;
                }
            };

            let candidates = extract_listings(&markup, &url);
            for candidate in &candidates {
                StagingStore::new(&mut self.storage).upsert(candidate)?;

                match merger.ingest(&mut self.storage, candidate) {
                    Ok(product) => {
                        StagingStore::new(&mut self.storage).mark_processed(&candidate.source_url)?;
                        progress.ingested.push(product);
                    }
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!("{}", e);
                        StagingStore::new(&mut self.storage)
                            .mark_error(&candidate.source_url, &e.to_string())?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let links = discover_links(&markup, &url);
            let mut queue = QueueManager::new(&mut self.storage);
            let mut queued = 0;
            for link in &links {
                if queue.enqueue_if_absent(link)? {
                    queued += 1;
                }
            }
            queue.mark_completed(&entry)?;

            progress.current = None;
            progress.counters.urls_processed += 1;
            tracing::info!(
                "Completed {} ({}/{}): {} products, {} new pages queued",
                entry.url,
                progress.counters.urls_processed,
                max_urls,
                candidates.len(),
                queued
            );
        }

        Ok(())
    }

    fn fail_entry(
        &mut self,
        entry: &QueueEntry,
        reason: &str,
        progress: &mut SessionProgress,
    ) -> Result<(), HarvestError> {
        QueueManager::new(&mut self.storage).mark_failed(entry, reason)?;
        progress.current = None;
        progress.counters.urls_failed += 1;
        Ok(())
    }

    fn reload_config(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };
        match load_config_with_hash(path) {
            Ok((config, hash)) => {
                if hash != self.config_hash {
                    tracing::info!("Configuration changed (hash: {})", hash);
                    self.config = Arc::new(config);
                    self.config_hash = hash;
                }
            }
            Err(e) => tracing::warn!(
                "Could not reload {}; keeping previous configuration: {}",
                path.display(),
                e
            ),
        }
    }
}

async fn dispatch_notification(
    notifier: &dyn Notifier,
    products: &[CatalogProduct],
) -> NotificationOutcome {
    if products.is_empty() {
        tracing::info!("No products ingested; skipping notification");
        return NotificationOutcome::Skipped;
    }

    let batch: Vec<ProductNotification> = products.iter().map(ProductNotification::from).collect();
    notifier.notify(&batch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::fetcher::scripted::{self, Responder};
    use crate::crawler::FetchError;
    use crate::ingest::NoopNotifier;
    use crate::state::{QueueStatus, StagingStatus};
    use crate::storage::SqliteStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    // Port 1 refuses connections, so robots.txt lookups fail open
    const SEED: &str = "http://127.0.0.1:1/list";

    fn config_text(stock: u32) -> String {
        format!(
            r#"
[crawler]
politeness-delay-ms = 0
fetcher = "http"

[stock]
min = {stock}
max = {stock}

[storage]
database-path = ":memory:"

[notification]
enabled = false
"#
        )
    }

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, batch: &[ProductNotification]) -> NotificationOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            NotificationOutcome::Sent { count: batch.len() }
        }
    }

    fn card(href: &str, image: &str) -> String {
        format!(
            r#"<div class="pi__core">
                <div class="pi__header"><a href="{href}">x</a></div>
                <span class="pi__image"><img src="{image}"></span>
                <a class="pi__name" href="{href}">Gelang {href}</a>
                <div class="pi__price">Rp 150.000</div>
                <a class="link link--normal" href="/seller">Acme Store</a>
            </div>"#
        )
    }

    fn page(cards: &[String]) -> String {
        format!("<html><body>{}</body></html>", cards.concat())
    }

    fn orchestrator(
        storage: SqliteStorage,
        config: Config,
        notifier: Arc<dyn Notifier>,
        respond: Responder,
        shutdowns: Arc<AtomicUsize>,
    ) -> CrawlOrchestrator<SqliteStorage> {
        let robots = RobotsPolicyCache::new(&config.robots, &config.crawler.user_agent).unwrap();
        CrawlOrchestrator::new(
            storage,
            Arc::new(config),
            "test".to_string(),
            Arc::new(robots),
            notifier,
        )
        .with_fetcher_factory(scripted::factory(respond, shutdowns))
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_session_future_is_send() {
        let mut orchestrator = orchestrator(
            SqliteStorage::new_in_memory().unwrap(),
            parse_config(&config_text(1)).unwrap(),
            Arc::new(NoopNotifier),
            Arc::new(|_: &Url| -> Result<String, FetchError> { Ok(String::new()) }),
            Arc::new(AtomicUsize::new(0)),
        );
        let seed = Url::parse(SEED).unwrap();

        let session = orchestrator.run(&seed, 1, SessionTrigger::Cli);
        assert_send(&session);
    }

    #[tokio::test]
    async fn test_fatal_fetch_error_aborts_session() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let notified = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = orchestrator(
            SqliteStorage::new_in_memory().unwrap(),
            parse_config(&config_text(1)).unwrap(),
            Arc::new(CountingNotifier(notified.clone())),
            Arc::new(|_: &Url| -> Result<String, FetchError> {
                Err(FetchError::Browser("renderer crashed".to_string()))
            }),
            shutdowns.clone(),
        );

        let summary = orchestrator
            .run(&Url::parse(SEED).unwrap(), 5, SessionTrigger::Cli)
            .await;

        assert_eq!(summary.status, SessionStatus::Failed);
        assert_eq!(summary.notification, NotificationOutcome::Skipped);
        assert_eq!(summary.urls_processed, 0);
        assert_eq!(summary.urls_failed, 1);
        assert!(summary.error.unwrap().contains("renderer crashed"));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        let entry = orchestrator.storage().get_queue_entry(SEED).unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert!(entry.error_message.unwrap().starts_with("aborted: "));

        let session = orchestrator
            .storage()
            .get_session(summary.session_id.unwrap())
            .unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_record_does_not_stop_the_page() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_image BEFORE INSERT ON product_images
                 WHEN NEW.image_url LIKE '%reject%'
                 BEGIN SELECT RAISE(ABORT, 'image rejected'); END;",
            )
            .unwrap();
        let markup = page(&[
            card("/p/1", "https://img.example.com/reject.jpg"),
            card("/p/2", "https://img.example.com/2.jpg"),
        ]);
        let notified = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = orchestrator(
            storage,
            parse_config(&config_text(1)).unwrap(),
            Arc::new(CountingNotifier(notified.clone())),
            Arc::new(move |_: &Url| -> Result<String, FetchError> { Ok(markup.clone()) }),
            Arc::new(AtomicUsize::new(0)),
        );

        let summary = orchestrator
            .run(&Url::parse(SEED).unwrap(), 5, SessionTrigger::Cli)
            .await;

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.urls_processed, 1);
        assert_eq!(summary.products_ingested, 1);
        assert_eq!(summary.notification, NotificationOutcome::Sent { count: 1 });
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        let storage = orchestrator.storage();
        let rejected = storage
            .get_staging_record("http://127.0.0.1:1/p/1")
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status, StagingStatus::Error);
        assert!(rejected.error_message.unwrap().contains("image rejected"));

        let accepted = storage
            .get_staging_record("http://127.0.0.1:1/p/2")
            .unwrap()
            .unwrap();
        assert_eq!(accepted.status, StagingStatus::Processed);

        assert_eq!(storage.count_products().unwrap(), 1);
        assert_eq!(
            storage.get_queue_entry(SEED).unwrap().unwrap().status,
            QueueStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_config_is_reloaded_per_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, config_text(5)).unwrap();
        let (config, _) = load_config_with_hash(&path).unwrap();

        let markup = page(&[card("/p/1", "https://img.example.com/1.jpg")]);
        let mut orchestrator = orchestrator(
            SqliteStorage::new_in_memory().unwrap(),
            config,
            Arc::new(NoopNotifier),
            Arc::new(move |_: &Url| -> Result<String, FetchError> { Ok(markup.clone()) }),
            Arc::new(AtomicUsize::new(0)),
        )
        .with_config_reload(path.clone());
        // Completed seeds are not re-queued, so each session gets its own
        let seed = |name: &str| Url::parse(&format!("http://127.0.0.1:1/{}", name)).unwrap();
        let product_url = "http://127.0.0.1:1/p/1";

        orchestrator.run(&seed("list-a"), 1, SessionTrigger::Scheduled).await;
        let product = orchestrator
            .storage()
            .find_product_by_source_url(product_url)
            .unwrap()
            .unwrap();
        assert_eq!(product.stock, 5);

        std::fs::write(&path, config_text(9)).unwrap();
        let summary = orchestrator.run(&seed("list-b"), 1, SessionTrigger::Scheduled).await;
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(orchestrator.config().stock.max, 9);
        let product = orchestrator
            .storage()
            .find_product_by_source_url(product_url)
            .unwrap()
            .unwrap();
        assert_eq!(product.stock, 9);

        std::fs::write(&path, "not = [valid").unwrap();
        let summary = orchestrator.run(&seed("list-c"), 1, SessionTrigger::Scheduled).await;
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(orchestrator.config().stock.max, 9);

        let first = orchestrator.storage().get_session(1).unwrap();
        let second = orchestrator.storage().get_session(2).unwrap();
        assert_ne!(first.config_hash, second.config_hash);
    }
}
