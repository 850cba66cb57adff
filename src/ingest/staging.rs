use crate::state::StagingStatus;
use crate::storage::{CandidateRecord, StagingRecord, Storage, StorageError, StorageResult};

/// Staging operations over a borrowed storage backend
pub struct StagingStore<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
}

impl<'a, S: Storage + ?Sized> StagingStore<'a, S> {
    pub fn new(storage: &'a mut S) -> Self {
        Self { storage }
    }

    /// Inserts or overwrites the staged record for `record.source_url`
    ///
    /// An existing record has every field replaced, its status reset to raw
    /// and its extraction timestamp refreshed. If another writer inserts the
    /// same URL between the lookup and the insert, the write is retried as
    /// an update.
    ///
    /// # Returns
    ///
    /// The staging row id
    pub fn upsert(&mut self, record: &CandidateRecord) -> StorageResult<i64> {
        if self
            .storage
            .get_staging_record(&record.source_url)?
            .is_some()
        {
            return self.storage.update_staging_record(record);
        }

        match self.storage.insert_staging_record(record) {
            Err(StorageError::ConstraintViolation(message)) => {
                tracing::debug!(
                    "Concurrent staging insert for {} ({}); updating instead",
                    record.source_url,
                    message
                );
                self.storage.update_staging_record(record)
            }
            other => other,
        }
    }

    pub fn mark_processed(&mut self, source_url: &str) -> StorageResult<()> {
        self.storage
            .set_staging_status(source_url, StagingStatus::Processed, None)
    }

    pub fn mark_error(&mut self, source_url: &str, message: &str) -> StorageResult<()> {
        self.storage
            .set_staging_status(source_url, StagingStatus::Error, Some(message))
    }

    pub fn get(&self, source_url: &str) -> StorageResult<Option<StagingRecord>> {
        self.storage.get_staging_record(source_url)
    }

    /// All staged records ordered by id
    pub fn list_all(&self) -> StorageResult<Vec<StagingRecord>> {
        self.storage.list_staging_records()
    }

    pub fn count(&self) -> StorageResult<u64> {
        Ok(self.storage.count_staging_by_status()?.values().sum())
    }
}
