//! Crawl queue state machine
//!
//! Wraps the storage queue operations and enforces the legal transitions:
//! pending -> in_progress -> {completed, failed}, with failed (or a stale
//! in_progress entry) returning to pending only through an explicit reset.

use crate::state::QueueStatus;
use crate::storage::{QueueEntry, Storage, StorageError, StorageResult};
use std::collections::HashMap;

/// Queue operations over a borrowed storage backend
pub struct QueueManager<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
}

impl<'a, S: Storage + ?Sized> QueueManager<'a, S> {
    pub fn new(storage: &'a mut S) -> Self {
        Self { storage }
    }

    /// Adds `url` as pending unless it is already queued
    ///
    /// # Returns
    ///
    /// `true` if a new entry was created
    pub fn enqueue_if_absent(&mut self, url: &str) -> StorageResult<bool> {
        let created = self.storage.insert_queue_entry_if_absent(url)?;
        if created {
            tracing::debug!("Queued {}", url);
        }
        Ok(created)
    }

    /// Makes sure `url` is pending: enqueues it, or resets it if it failed
    ///
    /// Completed and in-progress entries are left alone.
    ///
    /// # Returns
    ///
    /// `true` if the entry is newly pending
    pub fn reactivate(&mut self, url: &str) -> StorageResult<bool> {
        if self.enqueue_if_absent(url)? {
            return Ok(true);
        }

        match self.storage.get_queue_entry(url)? {
            Some(entry) if entry.status == QueueStatus::Failed => {
                self.storage.transition_queue_entry(
                    url,
                    QueueStatus::Failed,
                    QueueStatus::Pending,
                    None,
                )?;
                tracing::info!("Reset failed entry {} to pending", url);
                Ok(true)
            }
            Some(entry) => {
                tracing::debug!("{} already queued as {}", url, entry.status);
                Ok(false)
            }
            None => Err(StorageError::NotFound(format!("queue entry {}", url))),
        }
    }

    /// Claims the oldest pending entry, marking it in_progress
    pub fn claim_next(&mut self) -> StorageResult<Option<QueueEntry>> {
        self.storage.claim_next_pending()
    }

    pub fn mark_completed(&mut self, entry: &QueueEntry) -> StorageResult<()> {
        self.finish(entry, QueueStatus::Completed, None)
    }

    pub fn mark_failed(&mut self, entry: &QueueEntry, reason: &str) -> StorageResult<()> {
        tracing::info!("Marking {} failed: {}", entry.url, reason);
        self.finish(entry, QueueStatus::Failed, Some(reason))
    }

    /// Resets every failed entry to pending
    pub fn reset_failed(&mut self) -> StorageResult<usize> {
        self.storage
            .transition_all_queue_entries(QueueStatus::Failed, QueueStatus::Pending)
    }

    /// Returns entries left in_progress by an interrupted process to pending
    pub fn requeue_stale(&mut self) -> StorageResult<usize> {
        self.storage
            .transition_all_queue_entries(QueueStatus::InProgress, QueueStatus::Pending)
    }

    pub fn status_counts(&self) -> StorageResult<HashMap<QueueStatus, u64>> {
        self.storage.count_queue_by_status()
    }

    fn finish(
        &mut self,
        entry: &QueueEntry,
        to: QueueStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        if !entry.status.can_transition_to(to) {
            return Err(StorageError::InvalidTransition {
                url: entry.url.clone(),
                from: entry.status,
                to,
            });
        }
        self.storage
            .transition_queue_entry(&entry.url, entry.status, to, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    #[test]
    fn test_enqueue_twice_keeps_one_entry() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut queue = QueueManager::new(&mut storage);

        assert!(queue.enqueue_if_absent("https://s.example.com/a").unwrap());
        assert!(!queue.enqueue_if_absent("https://s.example.com/a").unwrap());

        let counts = queue.status_counts().unwrap();
        assert_eq!(counts.values().sum::<u64>(), 1);
    }

    #[test]
    fn test_claim_and_complete() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut queue = QueueManager::new(&mut storage);
        queue.enqueue_if_absent("https://s.example.com/a").unwrap();

        let entry = queue.claim_next().unwrap().unwrap();
        queue.mark_completed(&entry).unwrap();

        assert!(queue.claim_next().unwrap().is_none());
        let counts = queue.status_counts().unwrap();
        assert_eq!(counts.get(&QueueStatus::Completed), Some(&1));
    }

    #[test]
    fn test_cannot_complete_unclaimed_entry() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut queue = QueueManager::new(&mut storage);
        queue.enqueue_if_absent("https://s.example.com/a").unwrap();

        let entry = QueueEntry {
            url: "https://s.example.com/a".to_string(),
            status: QueueStatus::Pending,
            added_at: String::new(),
            error_message: None,
        };
        assert!(matches!(
            queue.mark_completed(&entry),
            Err(StorageError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_stale_claim_cannot_be_finished_twice() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut queue = QueueManager::new(&mut storage);
        queue.enqueue_if_absent("https://s.example.com/a").unwrap();

        let entry = queue.claim_next().unwrap().unwrap();
        queue.mark_failed(&entry, "timeout").unwrap();
        assert!(matches!(
            queue.mark_completed(&entry),
            Err(StorageError::InvalidTransition {
                from: QueueStatus::Failed,
                ..
            })
        ));
    }

    #[test]
    fn test_reactivate_resets_failed_only() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut queue = QueueManager::new(&mut storage);
        queue.enqueue_if_absent("https://s.example.com/a").unwrap();
        queue.enqueue_if_absent("https://s.example.com/b").unwrap();

        let a = queue.claim_next().unwrap().unwrap();
        queue.mark_failed(&a, "policy-disallowed").unwrap();
        let b = queue.claim_next().unwrap().unwrap();
        queue.mark_completed(&b).unwrap();

        assert!(queue.reactivate(&a.url).unwrap());
        assert!(!queue.reactivate(&b.url).unwrap());
        assert!(queue.reactivate("https://s.example.com/new").unwrap());

        let counts = queue.status_counts().unwrap();
        assert_eq!(counts.get(&QueueStatus::Pending), Some(&2));
        assert_eq!(counts.get(&QueueStatus::Completed), Some(&1));
    }

    #[test]
    fn test_operator_resets() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut queue = QueueManager::new(&mut storage);
        for url in ["https://s.example.com/1", "https://s.example.com/2"] {
            queue.enqueue_if_absent(url).unwrap();
        }

        let first = queue.claim_next().unwrap().unwrap();
        queue.mark_failed(&first, "timeout").unwrap();
        queue.claim_next().unwrap().unwrap();

        assert_eq!(queue.reset_failed().unwrap(), 1);
        assert_eq!(queue.requeue_stale().unwrap(), 1);

        let counts = queue.status_counts().unwrap();
        assert_eq!(counts.get(&QueueStatus::Pending), Some(&2));
    }
}
