use super::{ChangeSet, ReservationCounts, StockSection, StockStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CartOwner, Inventory, ProductRecord, ProductStock, StockError, StockReservation};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<Uuid, ProductRecord>,
    inventory: HashMap<Uuid, Inventory>,
    reservations: Vec<StockReservation>,
}

impl MemoryState {
    fn stock_of(&self, product: &ProductRecord, active_only: bool) -> ProductStock {
        let reservations = self
            .reservations
            .iter()
            .filter(|r| r.product_id == product.id && (!active_only || r.is_active()))
            .cloned()
            .collect();
        ProductStock::new(
            product.clone(),
            self.inventory.get(&product.id).cloned(),
            reservations,
        )
    }

    fn apply(&mut self, changes: ChangeSet) {
        for inventory in changes
            .inventory_inserts
            .into_iter()
            .chain(changes.inventory_updates)
        {
            self.inventory.insert(inventory.product_id, inventory);
        }

        self.reservations.extend(changes.reservation_inserts);

        for updated in changes.reservation_updates {
            if let Some(existing) = self.reservations.iter_mut().find(|r| r.id == updated.id) {
                *existing = updated;
            }
        }
    }
}

/// Stock store kept in process memory.
///
/// One async mutex guards the whole state, so exclusive sections over any
/// products run one at a time. Used by service tests and local tooling.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: Mutex<MemoryState>,
    fail_cache_writes: AtomicBool,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_product(&self, product: ProductRecord) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn add_inventory(&self, inventory: Inventory) {
        self.state
            .lock()
            .await
            .inventory
            .insert(inventory.product_id, inventory);
    }

    pub async fn add_reservation(&self, reservation: StockReservation) {
        self.state.lock().await.reservations.push(reservation);
    }

    pub async fn product(&self, product_id: Uuid) -> Option<ProductRecord> {
        self.state.lock().await.products.get(&product_id).cloned()
    }

    pub async fn inventory(&self, product_id: Uuid) -> Option<Inventory> {
        self.state.lock().await.inventory.get(&product_id).cloned()
    }

    pub async fn reservation(&self, reservation_id: Uuid) -> Option<StockReservation> {
        self.state
            .lock()
            .await
            .reservations
            .iter()
            .find(|r| r.id == reservation_id)
            .cloned()
    }

    pub async fn reservations_for_product(&self, product_id: Uuid) -> Vec<StockReservation> {
        self.state
            .lock()
            .await
            .reservations
            .iter()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Make every following product cache write fail
    pub fn set_fail_cache_writes(&self, fail: bool) {
        self.fail_cache_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn exclusive<T, F>(&self, product_ids: &[Uuid], f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StockSection) -> Result<T, StockError> + Send,
        T: Send,
    {
        let mut ids = product_ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Err(StockError::InvalidRequest("no products to lock".to_string()).into());
        }

        let mut state = self.state.lock().await;

        let mut stocks = Vec::with_capacity(ids.len());
        for id in &ids {
            let product = state
                .products
                .get(id)
                .ok_or_else(|| StockError::unavailable(*id, "product not found"))?;
            stocks.push(state.stock_of(product, true));
        }

        let originals: BTreeMap<Uuid, ProductStock> =
            stocks.iter().map(|s| (s.product_id(), s.clone())).collect();
        let persisted: HashSet<Uuid> = ids
            .iter()
            .filter(|id| state.inventory.contains_key(id))
            .copied()
            .collect();

        // Let competing tasks queue up on the lock
        tokio::task::yield_now().await;

        let now = Utc::now();
        let mut section = StockSection::new(now, stocks);
        let value = f(&mut section)?;

        let changes = ChangeSet::diff(&originals, &persisted, section.into_stocks(), now);
        changes.report_violations();
        state.apply(changes);

        Ok(value)
    }

    async fn load_stock(&self, product_id: Uuid) -> Result<ProductStock, StoreError> {
        let state = self.state.lock().await;
        let product = state
            .products
            .get(&product_id)
            .ok_or_else(|| StockError::unavailable(product_id, "product not found"))?;
        Ok(state.stock_of(product, true))
    }

    async fn write_product_stock(&self, product_id: Uuid, stock: i32) -> Result<(), StoreError> {
        if self.fail_cache_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "product cache writes are disabled".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StockError::unavailable(product_id, "product not found"))?;
        product.stock = stock;
        Ok(())
    }

    async fn find_reservations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.belongs_to_order(order_id))
            .cloned()
            .collect())
    }

    async fn find_active_cart_reservations(
        &self,
        owner: &CartOwner,
    ) -> Result<Vec<StockReservation>, StoreError> {
        if owner.is_anonymous() {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.is_active() && owner.owns(r))
            .cloned()
            .collect())
    }

    async fn find_products_with_due_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        let mut ids: Vec<Uuid> = state
            .reservations
            .iter()
            .filter(|r| r.is_due(now))
            .map(|r| r.product_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(ids)
    }

    async fn reservation_counts(&self, product_id: Uuid) -> Result<ReservationCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = ReservationCounts::default();
        for reservation in state.reservations.iter().filter(|r| r.product_id == product_id) {
            counts.add(reservation.status, 1);
        }
        Ok(counts)
    }

    async fn list_product_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        let mut ids: Vec<Uuid> = state.products.keys().copied().collect();
        ids.sort();
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::ReservationStatus;

    async fn store_with(on_hand: i32) -> (InMemoryStockStore, Uuid) {
        let store = InMemoryStockStore::new();
        let product = ProductRecord::new("Widget", on_hand);
        let id = product.id;
        store.add_product(product).await;
        (store, id)
    }

    #[tokio::test]
    async fn test_first_section_creates_inventory_row() {
        let (store, product_id) = store_with(8).await;
        assert!(store.inventory(product_id).await.is_none());

        store
            .exclusive(&[product_id], |section| {
                Ok(section.stock(product_id)?.available())
            })
            .await
            .unwrap();

        let inventory = store.inventory(product_id).await.unwrap();
        assert_eq!(inventory.quantity_on_hand, 8);
        assert_eq!(inventory.quantity_available, 8);
    }

    #[tokio::test]
    async fn test_rejected_section_writes_nothing() {
        let (store, product_id) = store_with(2).await;

        let result = store
            .exclusive(&[product_id], |section| {
                let hold = StockReservation::for_order(
                    product_id,
                    5,
                    Uuid::new_v4(),
                    None,
                    Duration::minutes(30),
                );
                section.stock_mut(product_id)?.reserve(hold)
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Rejected(StockError::InsufficientStock(_)))
        ));
        assert!(store.inventory(product_id).await.is_none());
        assert!(store.reservations_for_product(product_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_product_is_unavailable() {
        let store = InMemoryStockStore::new();
        let result = store.exclusive(&[Uuid::new_v4()], |_| Ok(())).await;

        assert!(matches!(
            result,
            Err(StoreError::Rejected(StockError::ProductUnavailable { .. }))
        ));
    }

    #[tokio::test]
    async fn test_due_products_and_counts() {
        let (store, product_id) = store_with(10).await;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let due = StockReservation::for_order(product_id, 1, order_id, None, Duration::minutes(30))
            .with_expiry(now - Duration::minutes(5));
        let live = StockReservation::for_order(product_id, 2, order_id, None, Duration::minutes(30));
        store.add_reservation(due).await;
        store.add_reservation(live).await;

        let ids = store
            .find_products_with_due_reservations(now, 10)
            .await
            .unwrap();
        assert_eq!(ids, vec![product_id]);

        let counts = store.reservation_counts(product_id).await.unwrap();
        assert_eq!(counts.active, 2);
        assert_eq!(counts.expired, 0);

        let by_order = store.find_reservations_by_order(order_id).await.unwrap();
        assert_eq!(by_order.len(), 2);
        assert!(by_order.iter().all(|r| r.status == ReservationStatus::Active));
    }

    #[tokio::test]
    async fn test_cache_write_failure_injection() {
        let (store, product_id) = store_with(3).await;
        store.set_fail_cache_writes(true);
        assert!(store.write_product_stock(product_id, 1).await.is_err());

        store.set_fail_cache_writes(false);
        store.write_product_stock(product_id, 1).await.unwrap();
        assert_eq!(store.product(product_id).await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_list_product_ids_pages_in_order() {
        let store = InMemoryStockStore::new();
        for i in 0..5 {
            store.add_product(ProductRecord::new(format!("P{}", i), 1)).await;
        }

        let first = store.list_product_ids(3, 0).await.unwrap();
        let second = store.list_product_ids(3, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(first[2] < second[0]);
    }
}
