//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{QueueStatus, StagingStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    now_timestamp, CandidateRecord, CatalogProduct, NewProduct, QueueEntry, SessionCounters,
    SessionRecord, SessionStatus, SessionTrigger, StagingRecord,
};
use crate::HarvestError;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path).map_err(StorageError::from)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )
        .map_err(StorageError::from)?;

        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn })
    }

    /// Raw connection, for tests that install triggers or inspect tables
    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

const QUEUE_COLUMNS: &str = "url, status, added_at, error_message";

const STAGING_COLUMNS: &str = "id, source_url, name, description, price, image_url, category, \
     brand, extracted_at, status, error_message, additional_data";

const PRODUCT_SELECT: &str = "
    SELECT p.id, p.name, p.price, p.category_id, p.brand_id, p.source_url,
           (SELECT image_url FROM product_images
             WHERE product_id = p.id AND is_primary = 1
             ORDER BY id LIMIT 1),
           COALESCE((SELECT quantity FROM inventory WHERE product_id = p.id), 0)
    FROM products p";

const SESSION_COLUMNS: &str = "id, trigger_kind, seed_url, url_limit, config_hash, started_at, \
     finished_at, status, urls_processed, urls_failed, products_ingested, error_message";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_map_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Map<String, Value>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let status: String = row.get(1)?;
    Ok(QueueEntry {
        url: row.get(0)?,
        status: QueueStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(1, format!("unknown queue status '{}'", status)))?,
        added_at: row.get(2)?,
        error_message: row.get(3)?,
    })
}

fn staging_record_from_row(row: &Row<'_>) -> rusqlite::Result<StagingRecord> {
    let status: String = row.get(9)?;
    Ok(StagingRecord {
        id: row.get(0)?,
        source_url: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        price: decimal_column(row, 4)?,
        image_url: row.get(5)?,
        category: row.get(6)?,
        brand: row.get(7)?,
        extracted_at: row.get(8)?,
        status: StagingStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(9, format!("unknown staging status '{}'", status)))?,
        error_message: row.get(10)?,
        additional_data: json_map_column(row, 11)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogProduct> {
    Ok(CatalogProduct {
        id: row.get(0)?,
        name: row.get(1)?,
        price: decimal_column(row, 2)?,
        category_id: row.get(3)?,
        brand_id: row.get(4)?,
        source_url: row.get(5)?,
        primary_image_url: row.get(6)?,
        stock: row.get(7)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let trigger: String = row.get(1)?;
    let status: String = row.get(7)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        trigger: SessionTrigger::from_db_string(&trigger)
            .ok_or_else(|| conversion_error(1, format!("unknown trigger '{}'", trigger)))?,
        seed_url: row.get(2)?,
        url_limit: row.get(3)?,
        config_hash: row.get(4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
        status: SessionStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(7, format!("unknown session status '{}'", status)))?,
        counters: SessionCounters {
            urls_processed: row.get(8)?,
            urls_failed: row.get(9)?,
            products_ingested: row.get(10)?,
        },
        error_message: row.get(11)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Crawl Queue =====

    fn insert_queue_entry_if_absent(&mut self, url: &str) -> StorageResult<bool> {
        let now = now_timestamp();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO crawl_queue (url, status, added_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![url, QueueStatus::Pending.to_db_string(), now],
        )?;
        Ok(inserted == 1)
    }

    fn get_queue_entry(&self, url: &str) -> StorageResult<Option<QueueEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {} FROM crawl_queue WHERE url = ?1", QUEUE_COLUMNS),
                params![url],
                queue_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn claim_next_pending(&mut self) -> StorageResult<Option<QueueEntry>> {
        let now = now_timestamp();
        let sql = format!(
            "UPDATE crawl_queue SET status = ?1, updated_at = ?2
             WHERE rowid = (
                 SELECT rowid FROM crawl_queue
                 WHERE status = ?3
                 ORDER BY added_at, rowid
                 LIMIT 1
             ) AND status = ?3
             RETURNING {}",
            QUEUE_COLUMNS
        );

        let entry = self
            .conn
            .query_row(
                &sql,
                params![
                    QueueStatus::InProgress.to_db_string(),
                    now,
                    QueueStatus::Pending.to_db_string()
                ],
                queue_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn transition_queue_entry(
        &mut self,
        url: &str,
        from: QueueStatus,
        to: QueueStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = now_timestamp();
        let changed = self.conn.execute(
            "UPDATE crawl_queue SET status = ?1, updated_at = ?2, error_message = ?3
             WHERE url = ?4 AND status = ?5",
            params![
                to.to_db_string(),
                now,
                error_message,
                url,
                from.to_db_string()
            ],
        )?;

        if changed == 1 {
            return Ok(());
        }

        match self.get_queue_entry(url)? {
            Some(entry) => Err(StorageError::InvalidTransition {
                url: url.to_string(),
                from: entry.status,
                to,
            }),
            None => Err(StorageError::NotFound(format!("queue entry {}", url))),
        }
    }

    fn transition_all_queue_entries(
        &mut self,
        from: QueueStatus,
        to: QueueStatus,
    ) -> StorageResult<usize> {
        let now = now_timestamp();
        let changed = self.conn.execute(
            "UPDATE crawl_queue SET status = ?1, updated_at = ?2, error_message = NULL
             WHERE status = ?3",
            params![to.to_db_string(), now, from.to_db_string()],
        )?;
        Ok(changed)
    }

    fn count_queue_by_status(&self) -> StorageResult<HashMap<QueueStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM crawl_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = QueueStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    // ===== Staging =====

    fn get_staging_record(&self, source_url: &str) -> StorageResult<Option<StagingRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM product_staging WHERE source_url = ?1",
                    STAGING_COLUMNS
                ),
                params![source_url],
                staging_record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_staging_record(&mut self, record: &CandidateRecord) -> StorageResult<i64> {
        let additional_data = serde_json::to_string(&record.additional_data)?;
        self.conn.execute(
            "INSERT INTO product_staging
                (source_url, name, description, price, image_url, category, brand,
                 extracted_at, status, additional_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.source_url,
                record.name,
                record.description,
                record.price.to_string(),
                record.image_url,
                record.category,
                record.brand,
                now_timestamp(),
                StagingStatus::Raw.to_db_string(),
                additional_data
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_staging_record(&mut self, record: &CandidateRecord) -> StorageResult<i64> {
        let additional_data = serde_json::to_string(&record.additional_data)?;
        let id = self
            .conn
            .query_row(
                "UPDATE product_staging
                 SET name = ?1, description = ?2, price = ?3, image_url = ?4, category = ?5,
                     brand = ?6, extracted_at = ?7, status = ?8, error_message = NULL,
                     additional_data = ?9
                 WHERE source_url = ?10
                 RETURNING id",
                params![
                    record.name,
                    record.description,
                    record.price.to_string(),
                    record.image_url,
                    record.category,
                    record.brand,
                    now_timestamp(),
                    StagingStatus::Raw.to_db_string(),
                    additional_data,
                    record.source_url
                ],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        id.ok_or_else(|| StorageError::NotFound(format!("staging record {}", record.source_url)))
    }

    fn set_staging_status(
        &mut self,
        source_url: &str,
        status: StagingStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE product_staging SET status = ?1, error_message = ?2 WHERE source_url = ?3",
            params![status.to_db_string(), error_message, source_url],
        )?;

        if changed == 0 {
            return Err(StorageError::NotFound(format!(
                "staging record {}",
                source_url
            )));
        }
        Ok(())
    }

    fn list_staging_records(&self) -> StorageResult<Vec<StagingRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM product_staging ORDER BY id",
            STAGING_COLUMNS
        ))?;
        let records = stmt
            .query_map([], staging_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count_staging_by_status(&self) -> StorageResult<HashMap<StagingStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM product_staging GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = StagingStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    // ===== Catalog =====

    fn savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0};",
            name
        ))?;
        Ok(())
    }

    fn find_brand_by_name(&self, name: &str) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM brands WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_brand(&mut self, name: &str) -> StorageResult<i64> {
        self.conn
            .execute("INSERT INTO brands (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_category_by_name(&self, name: &str) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM categories WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_category(&mut self, name: &str) -> StorageResult<i64> {
        self.conn
            .execute("INSERT INTO categories (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_product_by_source_url(
        &self,
        source_url: &str,
    ) -> StorageResult<Option<CatalogProduct>> {
        let product = self
            .conn
            .query_row(
                &format!("{} WHERE p.source_url = ?1", PRODUCT_SELECT),
                params![source_url],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    fn insert_product(&mut self, product: &NewProduct<'_>) -> StorageResult<i64> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO products
                (name, description, price, category_id, brand_id, source_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                product.name,
                product.description,
                product.price.to_string(),
                product.category_id,
                product.brand_id,
                product.source_url,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_product_image(
        &mut self,
        product_id: i64,
        image_url: &str,
        is_primary: bool,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO product_images (product_id, image_url, is_primary) VALUES (?1, ?2, ?3)",
            params![product_id, image_url, is_primary],
        )?;
        Ok(())
    }

    fn insert_inventory(&mut self, product_id: i64, quantity: u32) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO inventory (product_id, quantity, last_updated) VALUES (?1, ?2, ?3)",
            params![product_id, quantity, now_timestamp()],
        )?;
        Ok(())
    }

    fn set_inventory_quantity(&mut self, product_id: i64, quantity: u32) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO inventory (product_id, quantity, last_updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(product_id) DO UPDATE
             SET quantity = excluded.quantity, last_updated = excluded.last_updated",
            params![product_id, quantity, now_timestamp()],
        )?;
        Ok(())
    }

    fn get_product(&self, product_id: i64) -> StorageResult<CatalogProduct> {
        self.conn
            .query_row(
                &format!("{} WHERE p.id = ?1", PRODUCT_SELECT),
                params![product_id],
                product_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("product {}", product_id)))
    }

    fn count_products(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_brands(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM brands", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_categories(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_product_images(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM product_images", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Session Ledger =====

    fn create_session(
        &mut self,
        trigger: SessionTrigger,
        seed_url: &str,
        url_limit: u32,
        config_hash: &str,
    ) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO crawl_sessions (trigger_kind, seed_url, url_limit, config_hash, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                trigger.to_db_string(),
                seed_url,
                url_limit,
                config_hash,
                now_timestamp(),
                SessionStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_session(
        &mut self,
        session_id: i64,
        status: SessionStatus,
        counters: SessionCounters,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_sessions
             SET status = ?1, finished_at = ?2, urls_processed = ?3, urls_failed = ?4,
                 products_ingested = ?5, error_message = ?6
             WHERE id = ?7",
            params![
                status.to_db_string(),
                now_timestamp(),
                counters.urls_processed,
                counters.urls_failed,
                counters.products_ingested,
                error_message,
                session_id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    fn get_session(&self, session_id: i64) -> StorageResult<SessionRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM crawl_sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                session_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("session {}", session_id)))
    }

    fn list_recent_sessions(&self, limit: u32) -> StorageResult<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions ORDER BY id DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![limit], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    fn candidate(url: &str, name: &str) -> CandidateRecord {
        let mut additional_data = Map::new();
        additional_data.insert("seller_name".to_string(), Value::from("Acme"));
        additional_data.insert("rating".to_string(), Value::from(4.5));
        CandidateRecord {
            source_url: url.to_string(),
            name: name.to_string(),
            description: None,
            price: price("150000.50"),
            image_url: Some("https://img.example.com/1.jpg".to_string()),
            category: None,
            brand: Some("Acme".to_string()),
            additional_data,
        }
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.db");
        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            storage
                .insert_queue_entry_if_absent("https://shop.example.com/a")
                .unwrap();
        }
        let storage = SqliteStorage::new(&path).unwrap();
        assert!(storage
            .get_queue_entry("https://shop.example.com/a")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage
            .insert_queue_entry_if_absent("https://shop.example.com/a")
            .unwrap());
        assert!(!storage
            .insert_queue_entry_if_absent("https://shop.example.com/a")
            .unwrap());

        let counts = storage.count_queue_by_status().unwrap();
        assert_eq!(counts.get(&QueueStatus::Pending), Some(&1));
    }

    #[test]
    fn test_claim_returns_oldest_pending() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        for url in ["https://s.example.com/1", "https://s.example.com/2", "https://s.example.com/3"] {
            storage.insert_queue_entry_if_absent(url).unwrap();
        }

        let first = storage.claim_next_pending().unwrap().unwrap();
        assert_eq!(first.url, "https://s.example.com/1");
        assert_eq!(first.status, QueueStatus::InProgress);

        let second = storage.claim_next_pending().unwrap().unwrap();
        assert_eq!(second.url, "https://s.example.com/2");

        storage
            .transition_queue_entry(&first.url, QueueStatus::InProgress, QueueStatus::Completed, None)
            .unwrap();
        storage
            .transition_queue_entry(
                &second.url,
                QueueStatus::InProgress,
                QueueStatus::Failed,
                Some("boom"),
            )
            .unwrap();

        let third = storage.claim_next_pending().unwrap().unwrap();
        assert_eq!(third.url, "https://s.example.com/3");
        assert!(storage.claim_next_pending().unwrap().is_none());
    }

    #[test]
    fn test_conditional_transition() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .insert_queue_entry_if_absent("https://s.example.com/1")
            .unwrap();

        let result = storage.transition_queue_entry(
            "https://s.example.com/1",
            QueueStatus::InProgress,
            QueueStatus::Completed,
            None,
        );
        assert!(matches!(
            result,
            Err(StorageError::InvalidTransition {
                from: QueueStatus::Pending,
                ..
            })
        ));

        let missing = storage.transition_queue_entry(
            "https://s.example.com/missing",
            QueueStatus::InProgress,
            QueueStatus::Completed,
            None,
        );
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_failed_entry_keeps_reason() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .insert_queue_entry_if_absent("https://s.example.com/1")
            .unwrap();
        let entry = storage.claim_next_pending().unwrap().unwrap();
        storage
            .transition_queue_entry(
                &entry.url,
                QueueStatus::InProgress,
                QueueStatus::Failed,
                Some("policy-disallowed"),
            )
            .unwrap();

        let stored = storage.get_queue_entry(&entry.url).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("policy-disallowed"));

        let reset = storage
            .transition_all_queue_entries(QueueStatus::Failed, QueueStatus::Pending)
            .unwrap();
        assert_eq!(reset, 1);
        let stored = storage.get_queue_entry(&entry.url).unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.error_message, None);
    }

    #[test]
    fn test_staging_insert_and_update_in_place() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = candidate("https://s.example.com/p/1", "Gelang");
        let id = storage.insert_staging_record(&record).unwrap();

        storage
            .set_staging_status(&record.source_url, StagingStatus::Processed, None)
            .unwrap();

        let mut changed = record.clone();
        changed.name = "Gelang Perak".to_string();
        let updated_id = storage.update_staging_record(&changed).unwrap();
        assert_eq!(id, updated_id);

        let stored = storage
            .get_staging_record(&record.source_url)
            .unwrap()
            .unwrap();
        assert_eq!(stored.name, "Gelang Perak");
        assert_eq!(stored.status, StagingStatus::Raw);
        assert_eq!(stored.price, price("150000.50"));
        assert_eq!(stored.additional_data.get("seller_name"), Some(&Value::from("Acme")));
        assert_eq!(storage.list_staging_records().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_staging_insert_is_constraint_violation() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = candidate("https://s.example.com/p/1", "Gelang");
        storage.insert_staging_record(&record).unwrap();

        let result = storage.insert_staging_record(&record);
        assert!(matches!(result, Err(StorageError::ConstraintViolation(_))));
    }

    #[test]
    fn test_update_missing_staging_record() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = candidate("https://s.example.com/p/404", "Ghost");
        assert!(matches!(
            storage.update_staging_record(&record),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_product_with_image_and_inventory() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let brand_id = storage.insert_brand("Acme").unwrap();
        assert_eq!(storage.find_brand_by_name("Acme").unwrap(), Some(brand_id));
        assert_eq!(storage.find_brand_by_name("acme").unwrap(), None);

        let product_id = storage
            .insert_product(&NewProduct {
                name: "Gelang",
                description: None,
                price: price("1500.50"),
                category_id: None,
                brand_id: Some(brand_id),
                source_url: Some("https://s.example.com/p/1"),
            })
            .unwrap();
        storage
            .insert_product_image(product_id, "https://img.example.com/1.jpg", true)
            .unwrap();
        storage.insert_inventory(product_id, 42).unwrap();

        let product = storage
            .find_product_by_source_url("https://s.example.com/p/1")
            .unwrap()
            .unwrap();
        assert_eq!(product.id, product_id);
        assert_eq!(product.price, price("1500.50"));
        assert_eq!(product.stock, 42);
        assert_eq!(
            product.primary_image_url.as_deref(),
            Some("https://img.example.com/1.jpg")
        );

        storage.set_inventory_quantity(product_id, 7).unwrap();
        assert_eq!(storage.get_product(product_id).unwrap().stock, 7);
    }

    #[test]
    fn test_category_lookup_and_unsourced_product() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let category_id = storage.insert_category("Umum").unwrap();
        assert_eq!(storage.find_category_by_name("Umum").unwrap(), Some(category_id));
        assert!(matches!(
            storage.insert_category("Umum"),
            Err(StorageError::ConstraintViolation(_))
        ));

        let product_id = storage
            .insert_product(&NewProduct {
                name: "Cincin",
                description: Some("Perak 925"),
                price: price("99000"),
                category_id: Some(category_id),
                brand_id: None,
                source_url: None,
            })
            .unwrap();

        let product = storage.get_product(product_id).unwrap();
        assert_eq!(product.category_id, Some(category_id));
        assert_eq!(product.source_url, None);
        assert_eq!(product.stock, 0);
        assert_eq!(storage.count_categories().unwrap(), 1);
    }

    #[test]
    fn test_savepoint_rollback_discards_writes() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.savepoint("ingest_record").unwrap();
        storage.insert_brand("Acme").unwrap();
        storage.rollback_to_savepoint("ingest_record").unwrap();
        assert_eq!(storage.count_brands().unwrap(), 0);

        storage.savepoint("ingest_record").unwrap();
        storage.insert_brand("Acme").unwrap();
        storage.release_savepoint("ingest_record").unwrap();
        assert_eq!(storage.count_brands().unwrap(), 1);
    }

    #[test]
    fn test_session_ledger() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let id = storage
            .create_session(SessionTrigger::Cli, "https://s.example.com/", 5, "abc")
            .unwrap();

        let running = storage.get_session(id).unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        assert!(running.finished_at.is_none());

        let counters = SessionCounters {
            urls_processed: 3,
            urls_failed: 1,
            products_ingested: 12,
        };
        storage
            .finish_session(id, SessionStatus::Completed, counters, None)
            .unwrap();

        let sessions = storage.list_recent_sessions(10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Completed);
        assert_eq!(sessions[0].counters, counters);
        assert!(sessions[0].finished_at.is_some());
    }
}
