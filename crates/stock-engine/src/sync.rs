use common::metrics;
use domain::InventoryViolation;
use serde::Serialize;
use std::sync::Arc;
use stock_store::StockStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{ItemFailure, Result};

/// What one product sync found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub product_id: Uuid,
    pub previous_cache: i32,
    pub on_hand: i32,
    pub cache_rewritten: bool,
    pub violation: Option<InventoryViolation>,
}

impl SyncOutcome {
    pub fn changed_anything(&self) -> bool {
        self.cache_rewritten || self.violation.is_some()
    }
}

/// Totals of a catalog-wide sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub fixed: usize,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn errors(&self) -> usize {
        self.failures.len()
    }
}

/// A product whose cached counter disagrees with the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheDrift {
    pub product_id: Uuid,
    pub cached: i32,
    pub on_hand: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepMode {
    Everything,
    DriftedOnly,
}

/// Reconciles the product cache with the inventory ledger. The ledger always wins.
pub struct StockSyncService<S: StockStore> {
    store: Arc<S>,
    page_size: i64,
}

impl<S: StockStore> StockSyncService<S> {
    pub fn new(store: Arc<S>, page_size: i64) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// True iff the cached counter equals the ledger's on-hand figure
    pub async fn validate_consistency(&self, product_id: Uuid) -> Result<bool> {
        let stock = self.store.load_stock(product_id).await?;
        Ok(stock.is_cache_consistent())
    }

    pub async fn sync_product_with_inventory(&self, product_id: Uuid) -> Result<SyncOutcome> {
        // The section recomputes the ledger and corrects a breach on commit
        let (previous_cache, on_hand, violation) = self
            .store
            .exclusive(&[product_id], |section| {
                let stock = section.stock(product_id)?;
                let violation = stock.clone().refresh().into_iter().next();
                Ok((stock.product.stock, stock.on_hand(), violation))
            })
            .await?;

        let cache_rewritten = previous_cache != on_hand;
        if cache_rewritten {
            self.store.write_product_stock(product_id, on_hand).await?;
            info!(
                product_id = %product_id,
                previous_cache,
                on_hand,
                "Product cache resynced from inventory"
            );
        }

        let outcome = SyncOutcome {
            product_id,
            previous_cache,
            on_hand,
            cache_rewritten,
            violation,
        };
        metrics::record_sync_outcome(if outcome.changed_anything() {
            "fixed"
        } else {
            "consistent"
        });
        Ok(outcome)
    }

    /// Resync every product in the catalog
    pub async fn sync_all_products(&self) -> Result<SyncReport> {
        self.sweep(SweepMode::Everything).await
    }

    /// Resync only the products whose cache has drifted
    pub async fn validate_and_fix_all_inconsistencies(&self) -> Result<SyncReport> {
        self.sweep(SweepMode::DriftedOnly).await
    }

    /// Read-only list of drifted products
    pub async fn find_inconsistencies(&self) -> Result<Vec<CacheDrift>> {
        let mut drifts = Vec::new();
        let mut offset = 0;

        loop {
            let ids = self.store.list_product_ids(self.page_size, offset).await?;
            for product_id in &ids {
                let stock = self.store.load_stock(*product_id).await?;
                if !stock.is_cache_consistent() {
                    drifts.push(CacheDrift {
                        product_id: *product_id,
                        cached: stock.product.stock,
                        on_hand: stock.on_hand(),
                    });
                }
            }
            if (ids.len() as i64) < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        debug!(drifted = drifts.len(), "Inconsistency scan finished");
        Ok(drifts)
    }

    async fn sweep(&self, mode: SweepMode) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut offset = 0;

        loop {
            let ids = self.store.list_product_ids(self.page_size, offset).await?;
            for product_id in &ids {
                report.checked += 1;
                match self.sync_one(*product_id, mode).await {
                    Ok(true) => report.fixed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(product_id = %product_id, error = %e, "Product sync failed");
                        metrics::record_sync_outcome("error");
                        report.failures.push(ItemFailure {
                            key: *product_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
            if (ids.len() as i64) < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        if report.failures.is_empty() {
            info!(checked = report.checked, fixed = report.fixed, "Stock sync sweep finished");
        } else {
            warn!(
                checked = report.checked,
                fixed = report.fixed,
                errors = report.errors(),
                "Stock sync sweep finished with errors"
            );
        }
        Ok(report)
    }

    async fn sync_one(&self, product_id: Uuid, mode: SweepMode) -> Result<bool> {
        if mode == SweepMode::DriftedOnly && self.validate_consistency(product_id).await? {
            metrics::record_sync_outcome("consistent");
            return Ok(false);
        }
        Ok(self
            .sync_product_with_inventory(product_id)
            .await?
            .changed_anything())
    }
}
