//! Staging export
//!
//! Dumps every staged record to CSV or pretty-printed JSON. In CSV the
//! attribute bag is written as JSON text; in JSON it stays a nested object.
//! Prices are written as numbers in both formats.

use crate::storage::{StagingRecord, Storage};
use crate::HarvestError;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    id: i64,
    source_url: &'a str,
    name: &'a str,
    description: Option<&'a str>,
    price: String,
    image_url: Option<&'a str>,
    category: Option<&'a str>,
    brand: Option<&'a str>,
    extracted_at: &'a str,
    status: &'static str,
    error_message: Option<&'a str>,
    additional_data: String,
}

#[derive(Debug, Serialize)]
struct JsonRow<'a> {
    id: i64,
    source_url: &'a str,
    name: &'a str,
    description: Option<&'a str>,
    price: Value,
    image_url: Option<&'a str>,
    category: Option<&'a str>,
    brand: Option<&'a str>,
    extracted_at: &'a str,
    status: &'static str,
    error_message: Option<&'a str>,
    additional_data: &'a Map<String, Value>,
}

/// Exports all staging records to `path`
///
/// # Returns
///
/// * `Ok(0)` - No records; nothing was written
/// * `Ok(n)` - `n` records were written
/// * `Err(HarvestError)` - Query or write failure
pub fn export_staging(
    storage: &dyn Storage,
    format: ExportFormat,
    path: &Path,
) -> Result<usize, HarvestError> {
    let records = storage.list_staging_records()?;
    if records.is_empty() {
        tracing::info!("No staging records to export");
        return Ok(0);
    }

    match format {
        ExportFormat::Csv => write_csv(&records, path)?,
        ExportFormat::Json => write_json(&records, path)?,
    }

    tracing::info!(
        "Exported {} staging records to {}",
        records.len(),
        path.display()
    );
    Ok(records.len())
}

fn write_csv(records: &[StagingRecord], path: &Path) -> Result<(), HarvestError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(CsvRow {
            id: record.id,
            source_url: &record.source_url,
            name: &record.name,
            description: record.description.as_deref(),
            price: record.price.normalize().to_string(),
            image_url: record.image_url.as_deref(),
            category: record.category.as_deref(),
            brand: record.brand.as_deref(),
            extracted_at: &record.extracted_at,
            status: record.status.to_db_string(),
            error_message: record.error_message.as_deref(),
            additional_data: serde_json::to_string(&record.additional_data)?,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(records: &[StagingRecord], path: &Path) -> Result<(), HarvestError> {
    let rows: Vec<JsonRow<'_>> = records
        .iter()
        .map(|record| JsonRow {
            id: record.id,
            source_url: &record.source_url,
            name: &record.name,
            description: record.description.as_deref(),
            price: record
                .price
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            image_url: record.image_url.as_deref(),
            category: record.category.as_deref(),
            brand: record.brand.as_deref(),
            extracted_at: &record.extracted_at,
            status: record.status.to_db_string(),
            error_message: record.error_message.as_deref(),
            additional_data: &record.additional_data,
        })
        .collect();

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &rows)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CandidateRecord, SqliteStorage};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn storage_with_record() -> SqliteStorage {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut additional_data = Map::new();
        additional_data.insert("seller_name".to_string(), Value::from("Toko Emas"));
        additional_data.insert("rating".to_string(), Value::from(4.5));
        storage
            .insert_staging_record(&CandidateRecord {
                source_url: "https://s.example.com/p/1".to_string(),
                name: "Gelang, Perak".to_string(),
                description: None,
                price: Decimal::new(15000050, 2),
                image_url: Some("https://img.example.com/1.jpg".to_string()),
                category: None,
                brand: Some("Toko Emas".to_string()),
                additional_data,
            })
            .unwrap();
        storage
    }

    #[test]
    fn test_empty_staging_writes_nothing() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        assert_eq!(export_staging(&storage, ExportFormat::Csv, &path).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_csv_export() {
        let storage = storage_with_record();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        assert_eq!(export_staging(&storage, ExportFormat::Csv, &path).unwrap(), 1);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 12);
        assert_eq!(&headers[0], "id");
        assert_eq!(&headers[11], "additional_data");

        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], "Gelang, Perak");
        assert_eq!(&row[4], "150000.5");
        assert_eq!(&row[9], "raw");
        let bag: Map<String, Value> = serde_json::from_str(&row[11]).unwrap();
        assert_eq!(bag["seller_name"], "Toko Emas");
    }

    #[test]
    fn test_json_export() {
        let storage = storage_with_record();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");

        assert_eq!(export_staging(&storage, ExportFormat::Json, &path).unwrap(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["price"], serde_json::json!(150000.5));
        assert_eq!(rows[0]["additional_data"]["rating"], serde_json::json!(4.5));
        assert_eq!(rows[0]["description"], Value::Null);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(ExportFormat::from_name("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_name("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_name("xml"), None);
    }
}
