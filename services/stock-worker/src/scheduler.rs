use std::sync::Arc;
use std::time::Duration;
use stock_engine::{StockReservationService, StockServiceError, StockSyncService};
use stock_store::StockStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs the expiry sweep and the cache/ledger sync on fixed intervals
pub struct StockScheduler<S: StockStore> {
    reservations: Arc<StockReservationService<S>>,
    sync: Arc<StockSyncService<S>>,
    cleanup_every: Duration,
    sync_every: Duration,
}

impl<S: StockStore> StockScheduler<S> {
    pub fn new(
        reservations: Arc<StockReservationService<S>>,
        sync: Arc<StockSyncService<S>>,
        cleanup_every: Duration,
        sync_every: Duration,
    ) -> Self {
        Self {
            reservations,
            sync,
            cleanup_every,
            sync_every,
        }
    }

    /// Loop until `shutdown` changes. Both jobs run once right away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut cleanup = tokio::time::interval(self.cleanup_every);
        let mut sync = tokio::time::interval(self.sync_every);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            cleanup_every_secs = self.cleanup_every.as_secs(),
            sync_every_secs = self.sync_every.as_secs(),
            "Stock scheduler started"
        );

        loop {
            tokio::select! {
                _ = cleanup.tick() => {
                    self.run_cleanup().await;
                }
                _ = sync.tick() => {
                    self.run_sync().await;
                }
                _ = shutdown.changed() => {
                    info!("Stock scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One expiry sweep; returns the number of holds expired
    pub async fn run_cleanup(&self) -> usize {
        match self.reservations.cleanup_expired_reservations().await {
            Ok(expired) => {
                debug!(expired, "Expiry sweep finished");
                expired
            }
            Err(StockServiceError::PartialFailure(report)) => {
                warn!(
                    products = report.total(),
                    failed = report.failures.len(),
                    "Expiry sweep finished with failures"
                );
                0
            }
            Err(e) => {
                error!(error = %e, "Expiry sweep failed");
                0
            }
        }
    }

    /// One consistency sweep over the catalog; returns the number of products fixed
    pub async fn run_sync(&self) -> usize {
        match self.sync.validate_and_fix_all_inconsistencies().await {
            Ok(report) => report.fixed,
            Err(e) => {
                error!(error = %e, "Consistency sweep failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::config::ReservationConfig;
    use domain::{Inventory, ProductRecord, ReservationStatus, StockReservation};
    use stock_store::InMemoryStockStore;
    use uuid::Uuid;

    async fn scheduler_with_store() -> (StockScheduler<InMemoryStockStore>, Arc<InMemoryStockStore>) {
        let store = Arc::new(InMemoryStockStore::new());
        let scheduler = StockScheduler::new(
            Arc::new(StockReservationService::new(
                store.clone(),
                &ReservationConfig::default(),
            )),
            Arc::new(StockSyncService::new(store.clone(), 100)),
            Duration::from_secs(60),
            Duration::from_secs(900),
        );
        (scheduler, store)
    }

    #[tokio::test]
    async fn test_cleanup_expires_due_holds() {
        let (scheduler, store) = scheduler_with_store().await;
        let product = ProductRecord::new("Widget", 3);
        let product_id = product.id;
        store.add_product(product).await;
        let stale = StockReservation::for_order(
            product_id,
            1,
            Uuid::new_v4(),
            None,
            chrono::Duration::minutes(30),
        )
        .with_expiry(Utc::now() - chrono::Duration::minutes(1));
        let stale_id = stale.id;
        store.add_reservation(stale).await;

        assert_eq!(scheduler.run_cleanup().await, 1);
        assert_eq!(
            store.reservation(stale_id).await.unwrap().status,
            ReservationStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sync_repairs_drift() {
        let (scheduler, store) = scheduler_with_store().await;
        let product = ProductRecord::new("Widget", 12);
        let product_id = product.id;
        store.add_product(product).await;
        store.add_inventory(Inventory::new(product_id, 8)).await;

        assert_eq!(scheduler.run_sync().await, 1);
        assert_eq!(store.product(product_id).await.unwrap().stock, 8);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (scheduler, _store) = scheduler_with_store().await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(5), scheduler.run(rx)).await);
    }
}
