use stock_store::StockStore;
use tracing::{debug, warn};
use uuid::Uuid;

/// Copy a new on-hand figure into the product cache.
///
/// The ledger change is already committed, so a failed write is only logged
/// and counted. The next sync sweep repairs the cache.
pub(crate) async fn write_through<S: StockStore>(
    store: &S,
    product_id: Uuid,
    on_hand: i32,
    operation: &str,
) -> bool {
    match store.write_product_stock(product_id, on_hand).await {
        Ok(()) => {
            debug!(product_id = %product_id, stock = on_hand, operation, "Product cache updated");
            true
        }
        Err(e) => {
            warn!(
                product_id = %product_id,
                stock = on_hand,
                operation,
                error = %e,
                "Product cache write failed, inventory ledger stays authoritative"
            );
            common::metrics::record_cache_sync_failure(operation);
            false
        }
    }
}
