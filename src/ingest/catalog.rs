//! Catalog merge
//!
//! Promotes a freshly staged record into the canonical catalog. Products are
//! identified by source URL: a known product only has its stock level
//! replaced, an unknown one is created with its brand, primary image and
//! inventory row. Imported rows follow the same path but never touch a known
//! product. Each merge runs inside its own savepoint.

use crate::config::StockConfig;
use crate::ingest::IngestError;
use crate::storage::{CandidateRecord, CatalogProduct, NewProduct, Storage, StorageError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

const SAVEPOINT: &str = "catalog_merge";

/// A product row from a bulk import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
}

/// Result of importing one row
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Created(CatalogProduct),
    /// The source URL is already in the catalog; nothing was written
    Duplicate { product_id: i64 },
}

/// Merges staged records into the catalog
pub struct CatalogMerger {
    stock: StockConfig,
    rng: StdRng,
}

impl CatalogMerger {
    /// Creates a merger drawing stock levels from `stock`
    pub fn new(stock: StockConfig) -> Self {
        Self {
            stock,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates a merger with a deterministic stock sequence
    pub fn with_seed(stock: StockConfig, seed: u64) -> Self {
        Self {
            stock,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Merges one record into the catalog
    ///
    /// On failure every write made for this record is rolled back.
    ///
    /// # Returns
    ///
    /// * `Ok(CatalogProduct)` - The created or refreshed product
    /// * `Err(IngestError::Integrity)` - A uniqueness rule rejected the record
    /// * `Err(IngestError::Storage)` - Any other storage failure
    pub fn ingest<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        record: &CandidateRecord,
    ) -> Result<CatalogProduct, IngestError> {
        self.in_savepoint(storage, &record.source_url, |merger, storage| {
            merger.merge(storage, record)
        })
    }

    /// Adds one imported row to the catalog
    ///
    /// Unlike `ingest`, a row whose source URL is already in the catalog is
    /// left untouched, stock included.
    pub fn import<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        row: &ImportRow,
    ) -> Result<ImportOutcome, IngestError> {
        let label = row.source_url.as_deref().unwrap_or(&row.name).to_string();
        self.in_savepoint(storage, &label, |merger, storage| {
            if let Some(url) = row.source_url.as_deref() {
                if let Some(existing) = storage.find_product_by_source_url(url)? {
                    return Ok(ImportOutcome::Duplicate {
                        product_id: existing.id,
                    });
                }
            }

            let category_id = match non_blank(row.category.as_deref()) {
                Some(name) => Some(resolve_category(storage, name)?),
                None => None,
            };
            let brand_id = match non_blank(row.brand.as_deref()) {
                Some(name) => Some(resolve_brand(storage, name)?),
                None => None,
            };

            merger
                .create(
                    storage,
                    &NewProduct {
                        name: &row.name,
                        description: row.description.as_deref(),
                        price: row.price,
                        category_id,
                        brand_id,
                        source_url: row.source_url.as_deref(),
                    },
                    row.image_url.as_deref(),
                )
                .map(ImportOutcome::Created)
        })
    }

    fn in_savepoint<S, T, F>(
        &mut self,
        storage: &mut S,
        label: &str,
        op: F,
    ) -> Result<T, IngestError>
    where
        S: Storage + ?Sized,
        F: FnOnce(&mut Self, &mut S) -> Result<T, StorageError>,
    {
        storage.savepoint(SAVEPOINT)?;

        match op(self, storage) {
            Ok(value) => {
                storage.release_savepoint(SAVEPOINT)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = storage.rollback_to_savepoint(SAVEPOINT) {
                    tracing::error!(
                        "Rollback failed after ingest error for {}: {}",
                        label,
                        rollback
                    );
                }
                Err(match e {
                    StorageError::ConstraintViolation(message) => IngestError::Integrity {
                        source_url: label.to_string(),
                        message,
                    },
                    other => IngestError::Storage(other),
                })
            }
        }
    }

    fn merge<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        record: &CandidateRecord,
    ) -> Result<CatalogProduct, StorageError> {
        let brand_id = match non_blank(record.brand.as_deref()) {
            Some(name) => Some(resolve_brand(storage, name)?),
            None => None,
        };

        if let Some(existing) = storage.find_product_by_source_url(&record.source_url)? {
            let quantity = self.draw_quantity();
            storage.set_inventory_quantity(existing.id, quantity)?;
            tracing::debug!(
                "Refreshed stock of product {} ({}) to {}",
                existing.id,
                record.source_url,
                quantity
            );
            return Ok(CatalogProduct {
                stock: quantity,
                ..existing
            });
        }

        self.create(
            storage,
            &NewProduct {
                name: &record.name,
                description: record.description.as_deref(),
                price: record.price,
                category_id: None,
                brand_id,
                source_url: Some(&record.source_url),
            },
            record.image_url.as_deref(),
        )
    }

    /// Inserts a product with its primary image and a random stock level
    fn create<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        product: &NewProduct<'_>,
        image_url: Option<&str>,
    ) -> Result<CatalogProduct, StorageError> {
        let label = product.source_url.unwrap_or(product.name);
        let product_id = storage.insert_product(product)?;

        match image_url {
            Some(image_url) => storage.insert_product_image(product_id, image_url, true)?,
            None => tracing::info!("Product {} has no image", label),
        }

        let quantity = self.draw_quantity();
        storage.insert_inventory(product_id, quantity)?;

        tracing::debug!(
            "Created product {} for {} with stock {}",
            product_id,
            label,
            quantity
        );

        Ok(CatalogProduct {
            id: product_id,
            name: product.name.to_string(),
            price: product.price,
            category_id: product.category_id,
            brand_id: product.brand_id,
            source_url: product.source_url.map(str::to_string),
            primary_image_url: image_url.map(str::to_string),
            stock: quantity,
        })
    }

    fn draw_quantity(&mut self) -> u32 {
        self.rng.random_range(self.stock.min..=self.stock.max)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Looks up a category by exact name, creating it if absent
fn resolve_category<S: Storage + ?Sized>(
    storage: &mut S,
    name: &str,
) -> Result<i64, StorageError> {
    if let Some(id) = storage.find_category_by_name(name)? {
        return Ok(id);
    }
    let id = storage.insert_category(name)?;
    tracing::info!("Created category '{}' ({})", name, id);
    Ok(id)
}

/// Looks up a brand by exact name, creating it if absent
fn resolve_brand<S: Storage + ?Sized>(storage: &mut S, name: &str) -> Result<i64, StorageError> {
    if let Some(id) = storage.find_brand_by_name(name)? {
        return Ok(id);
    }
    let id = storage.insert_brand(name)?;
    tracing::info!("Created brand '{}' ({})", name, id);
    Ok(id)
}
