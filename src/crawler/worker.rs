//! Background crawl worker
//!
//! A single task owns the orchestrator and runs one session at a time. The
//! on-demand trigger and any number of interval schedulers feed it jobs over
//! one channel, so sessions started inside this process never overlap.
//! Finished sessions are published to subscribers.

use crate::crawler::orchestrator::{CrawlOrchestrator, SessionSummary};
use crate::storage::{SessionTrigger, Storage};
use crate::url::parse_crawl_url;
use crate::UrlError;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

const REPORT_CAPACITY: usize = 16;

/// Errors returned to the caller of a crawl trigger
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Invalid seed URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("Crawling limit must be at least 1, got {0}")]
    InvalidLimit(u32),

    #[error("Schedule interval must be non-zero")]
    InvalidInterval,

    #[error("Crawl worker is not running")]
    WorkerStopped,
}

/// A session request waiting for the worker
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub seed: Url,
    pub limit: u32,
    pub trigger: SessionTrigger,
}

/// Acknowledgement that a session was queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub seed_url: String,
    pub limit: u32,
}

/// Spawns the worker task
pub struct CrawlWorker;

impl CrawlWorker {
    /// Moves `orchestrator` into a new worker task
    ///
    /// # Arguments
    ///
    /// * `orchestrator` - Runs every session submitted to the worker
    /// * `default_limit` - URL budget for triggers that omit one
    pub fn spawn<S>(mut orchestrator: CrawlOrchestrator<S>, default_limit: u32) -> CrawlHandle
    where
        S: Storage + Send + 'static,
    {
        let (jobs, mut incoming) = mpsc::unbounded_channel::<CrawlJob>();
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let publisher = reports.clone();

        let task = tokio::spawn(async move {
            tracing::info!("Crawl worker started");
            while let Some(job) = incoming.recv().await {
                let summary = orchestrator.run(&job.seed, job.limit, job.trigger).await;
                if publisher.send(summary).is_err() {
                    tracing::debug!("No subscribers for session report");
                }
            }
            tracing::info!("Crawl worker stopped");
        });

        CrawlHandle {
            jobs: Some(jobs),
            reports,
            default_limit,
            schedulers: Vec::new(),
            task,
        }
    }
}

/// Submits jobs to a running worker
pub struct CrawlHandle {
    jobs: Option<mpsc::UnboundedSender<CrawlJob>>,
    reports: broadcast::Sender<SessionSummary>,
    default_limit: u32,
    schedulers: Vec<JoinHandle<()>>,
    task: JoinHandle<()>,
}

impl CrawlHandle {
    /// Queues an on-demand session
    ///
    /// Returns as soon as the request is validated and queued; the session
    /// itself runs on the worker.
    ///
    /// # Arguments
    ///
    /// * `seed_url` - Absolute http(s) listing URL
    /// * `limit` - URL budget, or `None` for the configured default
    pub fn start_crawl(&self, seed_url: &str, limit: Option<u32>) -> Result<Accepted, TriggerError> {
        let job = self.validate(seed_url, limit, SessionTrigger::OnDemand)?;
        let accepted = Accepted {
            seed_url: job.seed.to_string(),
            limit: job.limit,
        };
        self.submit(job)?;
        tracing::info!(
            "Accepted crawl of {} (limit {})",
            accepted.seed_url,
            accepted.limit
        );
        Ok(accepted)
    }

    /// Queues a scheduled session every `interval`, starting now
    pub fn schedule_every(
        &mut self,
        interval: Duration,
        seed_url: &str,
        limit: Option<u32>,
    ) -> Result<(), TriggerError> {
        if interval.is_zero() {
            return Err(TriggerError::InvalidInterval);
        }
        let job = self.validate(seed_url, limit, SessionTrigger::Scheduled)?;
        let jobs = self.jobs.clone().ok_or(TriggerError::WorkerStopped)?;

        tracing::info!(
            "Scheduling crawl of {} every {:?} (limit {})",
            job.seed,
            interval,
            job.limit
        );

        self.schedulers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if jobs.send(job.clone()).is_err() {
                    break;
                }
                tracing::debug!("Scheduled crawl of {} queued", job.seed);
            }
        }));

        Ok(())
    }

    /// Receives the summary of every session finished after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSummary> {
        self.reports.subscribe()
    }

    /// Stops the schedulers, lets queued sessions drain and waits for the worker
    pub async fn shutdown(mut self) {
        for scheduler in self.schedulers.drain(..) {
            scheduler.abort();
        }
        self.jobs = None;

        if let Err(e) = self.task.await {
            tracing::error!("Crawl worker terminated abnormally: {}", e);
        }
    }

    fn validate(
        &self,
        seed_url: &str,
        limit: Option<u32>,
        trigger: SessionTrigger,
    ) -> Result<CrawlJob, TriggerError> {
        let seed = parse_crawl_url(seed_url)?;
        let limit = limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Err(TriggerError::InvalidLimit(limit));
        }
        Ok(CrawlJob {
            seed,
            limit,
            trigger,
        })
    }

    fn submit(&self, job: CrawlJob) -> Result<(), TriggerError> {
        self.jobs
            .as_ref()
            .ok_or(TriggerError::WorkerStopped)?
            .send(job)
            .map_err(|_| TriggerError::WorkerStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::fetcher::scripted;
    use crate::crawler::FetchError;
    use crate::ingest::NoopNotifier;
    use crate::robots::RobotsPolicyCache;
    use crate::storage::{SessionStatus, SqliteStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFIG: &str = r#"
[crawler]
politeness-delay-ms = 0
render-timeout-secs = 2
fetcher = "http"
default-limit = 5

[stock]
min = 1
max = 1

[storage]
database-path = ":memory:"

[notification]
enabled = false
"#;

    fn handle() -> CrawlHandle {
        let config = Arc::new(parse_config(CONFIG).unwrap());
        let robots = Arc::new(
            RobotsPolicyCache::new(&config.robots, &config.crawler.user_agent).unwrap(),
        );
        let orchestrator = CrawlOrchestrator::new(
            SqliteStorage::new_in_memory().unwrap(),
            config.clone(),
            "test".to_string(),
            robots,
            Arc::new(NoopNotifier),
        );
        CrawlWorker::spawn(orchestrator, config.crawler.default_limit)
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let handle = handle();

        assert!(matches!(
            handle.start_crawl("ftp://s.example.com/list", None),
            Err(TriggerError::InvalidUrl(_))
        ));
        assert!(matches!(
            handle.start_crawl("not a url", None),
            Err(TriggerError::InvalidUrl(_))
        ));
        assert!(matches!(
            handle.start_crawl("https://s.example.com/list", Some(0)),
            Err(TriggerError::InvalidLimit(0))
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_accepted_session_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><div class=\"pi__core\"></div></body></html>"),
            )
            .mount(&server)
            .await;

        let handle = handle();
        let mut reports = handle.subscribe();

        let seed = format!("{}/list", server.uri());
        let accepted = handle.start_crawl(&seed, None).unwrap();
        assert_eq!(accepted.limit, 5);

        let summary = reports.recv().await.unwrap();
        assert_eq!(summary.trigger, SessionTrigger::OnDemand);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.urls_processed, 1);
        assert_eq!(summary.products_ingested, 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_rejected() {
        let mut handle = handle();
        handle.jobs = None;
        assert!(matches!(
            handle.start_crawl("https://s.example.com/list", None),
            Err(TriggerError::WorkerStopped)
        ));
        handle.shutdown().await;
    }

    fn scripted_handle(shutdowns: Arc<AtomicUsize>) -> CrawlHandle {
        let respond = |_: &Url| -> Result<String, FetchError> {
            Ok("<html><body><div class=\"pi__core\"></div></body></html>".to_string())
        };
        let config = Arc::new(parse_config(CONFIG).unwrap());
        let robots = Arc::new(
            RobotsPolicyCache::new(&config.robots, &config.crawler.user_agent).unwrap(),
        );
        let orchestrator = CrawlOrchestrator::new(
            SqliteStorage::new_in_memory().unwrap(),
            config.clone(),
            "test".to_string(),
            robots,
            Arc::new(NoopNotifier),
        )
        .with_fetcher_factory(scripted::factory(Arc::new(respond), shutdowns));
        CrawlWorker::spawn(orchestrator, config.crawler.default_limit)
    }

    #[tokio::test]
    async fn test_schedule_runs_repeatedly() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut handle = scripted_handle(shutdowns.clone());
        let mut reports = handle.subscribe();

        handle
            .schedule_every(Duration::from_millis(50), "http://127.0.0.1:1/list", Some(2))
            .unwrap();

        for _ in 0..2 {
            let summary = tokio::time::timeout(Duration::from_secs(5), reports.recv())
                .await
                .expect("scheduled session did not run")
                .unwrap();
            assert_eq!(summary.trigger, SessionTrigger::Scheduled);
            assert_eq!(summary.status, SessionStatus::Completed);
            assert_eq!(summary.seed_url, "http://127.0.0.1:1/list");
        }

        handle.shutdown().await;
        assert!(shutdowns.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_schedule_rejects_bad_requests() {
        let mut handle = scripted_handle(Arc::new(AtomicUsize::new(0)));

        assert!(matches!(
            handle.schedule_every(Duration::ZERO, "http://127.0.0.1:1/list", None),
            Err(TriggerError::InvalidInterval)
        ));
        assert!(matches!(
            handle.schedule_every(Duration::from_secs(1), "mailto:x@example.com", None),
            Err(TriggerError::InvalidUrl(_))
        ));
        assert!(matches!(
            handle.schedule_every(Duration::from_secs(1), "http://127.0.0.1:1/list", Some(0)),
            Err(TriggerError::InvalidLimit(0))
        ));
        assert!(handle.schedulers.is_empty());

        handle.shutdown().await;
    }
}
