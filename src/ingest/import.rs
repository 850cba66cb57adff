//! Bulk catalog import
//!
//! Loads products from a CSV file straight into the catalog, bypassing the
//! crawler and the staging table. Headers may use the listing site's column
//! names (`Nama Produk`, `Harga`, `Kategori`, `Nama Toko`, `Link Produk`,
//! `Link Gambar`) or the staging export names (`name`, `price`, ...).
//!
//! Rows that cannot be read, lack a name or price, or whose source URL is
//! already in the catalog are skipped. Every other row runs in its own
//! savepoint.

use crate::crawler::clean_price;
use crate::ingest::{CatalogMerger, ImportOutcome, ImportRow};
use crate::storage::Storage;
use crate::HarvestError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Category given to rows that do not name one
pub const DEFAULT_CATEGORY: &str = "Umum";

/// Counts from one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct CsvProduct {
    #[serde(rename = "Nama Produk", alias = "name", default)]
    name: Option<String>,
    #[serde(rename = "Harga", alias = "price", default)]
    price: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "Kategori", alias = "category", default)]
    category: Option<String>,
    #[serde(rename = "Nama Toko", alias = "brand", default)]
    brand: Option<String>,
    #[serde(rename = "Link Produk", alias = "source_url", default)]
    source_url: Option<String>,
    #[serde(rename = "Link Gambar", alias = "image_url", default)]
    image_url: Option<String>,
}

impl CsvProduct {
    fn into_row(self) -> Result<ImportRow, String> {
        let name = self.name.ok_or("missing product name")?;
        let raw_price = self.price.ok_or("missing price")?;
        let price =
            parse_price(&raw_price).ok_or_else(|| format!("invalid price '{}'", raw_price))?;

        Ok(ImportRow {
            name,
            description: self.description,
            price,
            category: Some(self.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string())),
            brand: self.brand,
            source_url: self.source_url,
            image_url: self.image_url,
        })
    }
}

/// Parses a price in plain decimal form or in listing form ("Rp150.000")
fn parse_price(raw: &str) -> Option<Decimal> {
    if raw.contains("Rp") {
        return clean_price(raw);
    }
    Decimal::from_str(raw)
        .ok()
        .filter(|price| !price.is_sign_negative())
}

/// Imports every row of the CSV file at `path`
///
/// # Returns
///
/// * `Ok(ImportSummary)` - Counts of imported and skipped rows
/// * `Err(HarvestError)` - The file could not be opened, or a storage failure
///   other than an integrity violation stopped the import
pub fn import_catalog_csv<S: Storage + ?Sized>(
    storage: &mut S,
    merger: &mut CatalogMerger,
    path: &Path,
) -> Result<ImportSummary, HarvestError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvProduct>().enumerate() {
        let row_number = index + 1;
        let row = match result
            .map_err(|e| e.to_string())
            .and_then(CsvProduct::into_row)
        {
            Ok(row) => row,
            Err(reason) => {
                tracing::warn!("Skipping row {}: {}", row_number, reason);
                summary.skipped += 1;
                continue;
            }
        };

        match merger.import(storage, &row) {
            Ok(ImportOutcome::Created(product)) => {
                tracing::debug!(
                    "Row {}: imported '{}' as {}",
                    row_number,
                    product.name,
                    product.id
                );
                summary.imported += 1;
            }
            Ok(ImportOutcome::Duplicate { product_id }) => {
                tracing::info!(
                    "Row {}: '{}' already in catalog as {}",
                    row_number,
                    row.name,
                    product_id
                );
                summary.skipped += 1;
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Row {}: {}", row_number, e);
                summary.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        "Imported {} products from {} ({} skipped)",
        summary.imported,
        path.display(),
        summary.skipped
    );
    Ok(summary)
}
