use domain::{merge_items, StockError, StockItem};
use std::sync::Arc;
use std::time::Instant;
use stock_store::StockStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::write_through;
use crate::errors::{BatchReport, Result};
use common::metrics;

/// Direct-debit stock operations for checkouts that do not place holds.
pub struct StockAvailabilityService<S: StockStore> {
    store: Arc<S>,
}

impl<S: StockStore> StockAvailabilityService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fails with every short item listed, or on the first unsellable product.
    pub async fn check_availability(&self, items: &[StockItem]) -> Result<()> {
        let items = merge_items(items)?;
        let mut shortages = Vec::new();

        for item in &items {
            let stock = self.store.load_stock(item.product_id).await?;
            stock.ensure_sellable()?;
            if let Some(shortage) = stock.shortage(item.quantity) {
                shortages.push(shortage);
            }
        }

        if shortages.is_empty() {
            debug!(items = items.len(), "Stock available for all items");
            Ok(())
        } else {
            warn!(short_items = shortages.len(), "Insufficient stock");
            metrics::record_insufficient_stock("check_availability");
            Err(StockError::InsufficientStock(shortages).into())
        }
    }

    /// Permanently remove units for each item.
    ///
    /// Availability is checked for the whole batch first. Each item is then
    /// debited in its own exclusive section, so an item that lost its stock in
    /// between fails alone while the others go through.
    pub async fn debit_stock(&self, items: &[StockItem]) -> Result<BatchReport> {
        let started = Instant::now();
        let items = merge_items(items)?;
        self.check_availability(&items).await?;

        let mut report = BatchReport::new();
        for item in &items {
            let product_id = item.product_id;
            let quantity = item.quantity;

            match self
                .store
                .exclusive(&[product_id], |section| {
                    section.stock_mut(product_id)?.debit(quantity)
                })
                .await
            {
                Ok(on_hand) => {
                    info!(product_id = %product_id, quantity, on_hand, "Stock debited");
                    write_through(self.store.as_ref(), product_id, on_hand, "debit_stock").await;
                    report.record_success();
                }
                Err(e) => {
                    error!(product_id = %product_id, quantity, error = %e, "Stock debit failed");
                    report.record_failure(product_id, &e);
                }
            }
        }

        metrics::record_stock_operation(
            "debit_stock",
            report.is_clean(),
            started.elapsed().as_secs_f64(),
        );
        report.into_result()
    }

    /// Put units back on hand after a cancellation or refund.
    ///
    /// Callers must not credit more than was debited for the order.
    pub async fn credit_stock(&self, items: &[StockItem]) -> Result<BatchReport> {
        let started = Instant::now();
        let items = merge_items(items)?;

        let mut report = BatchReport::new();
        for item in &items {
            let product_id = item.product_id;
            let quantity = item.quantity;

            match self
                .store
                .exclusive(&[product_id], |section| {
                    section.stock_mut(product_id)?.credit(quantity)
                })
                .await
            {
                Ok(on_hand) => {
                    info!(product_id = %product_id, quantity, on_hand, "Stock credited");
                    write_through(self.store.as_ref(), product_id, on_hand, "credit_stock").await;
                    report.record_success();
                }
                Err(e) => {
                    error!(product_id = %product_id, quantity, error = %e, "Stock credit failed");
                    report.record_failure(product_id, &e);
                }
            }
        }

        metrics::record_stock_operation(
            "credit_stock",
            report.is_clean(),
            started.elapsed().as_secs_f64(),
        );
        report.into_result()
    }

    pub async fn get_available_stock(&self, product_id: Uuid) -> Result<i32> {
        let stock = self.store.load_stock(product_id).await?;
        Ok(stock.available())
    }
}
