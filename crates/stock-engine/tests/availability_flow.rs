use common::config::ReservationConfig;
use domain::{Inventory, ProductRecord, StockItem};
use std::sync::Arc;
use stock_engine::{
    StockAvailabilityService, StockReservationService, StockServiceError, StockSyncService,
};
use stock_store::{InMemoryStockStore, StockStore};
use uuid::Uuid;

async fn add_product(store: &InMemoryStockStore, name: &str, on_hand: i32) -> Uuid {
    let product = ProductRecord::new(name, on_hand);
    let id = product.id;
    store.add_inventory(Inventory::new(id, on_hand)).await;
    store.add_product(product).await;
    id
}

#[tokio::test]
async fn test_debit_succeeds_when_cache_write_fails() {
    let store = Arc::new(InMemoryStockStore::new());
    let product_id = add_product(&store, "Widget", 6).await;
    let availability = StockAvailabilityService::new(store.clone());
    let sync = StockSyncService::new(store.clone(), 100);

    store.set_fail_cache_writes(true);
    let report = availability
        .debit_stock(&[StockItem::new(product_id, 2)])
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    // Ledger moved, cache did not
    assert_eq!(store.inventory(product_id).await.unwrap().quantity_on_hand, 4);
    assert_eq!(store.product(product_id).await.unwrap().stock, 6);
    assert!(!sync.validate_consistency(product_id).await.unwrap());

    store.set_fail_cache_writes(false);
    let drifts = sync.find_inconsistencies().await.unwrap();
    assert_eq!(drifts.len(), 1);
    assert_eq!(drifts[0].cached, 6);
    assert_eq!(drifts[0].on_hand, 4);

    let report = sync.validate_and_fix_all_inconsistencies().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.fixed, 1);
    assert!(sync.validate_consistency(product_id).await.unwrap());
}

#[tokio::test]
async fn test_debit_cannot_take_reserved_units() {
    let store = Arc::new(InMemoryStockStore::new());
    let product_id = add_product(&store, "Widget", 5).await;
    let availability = StockAvailabilityService::new(store.clone());
    let reservations = StockReservationService::new(store.clone(), &ReservationConfig::default());

    reservations
        .reserve_for_order(Uuid::new_v4(), None, &[StockItem::new(product_id, 4)])
        .await
        .unwrap();

    let err = availability
        .debit_stock(&[StockItem::new(product_id, 2)])
        .await
        .unwrap_err();
    assert!(err.is_insufficient_stock());
    assert_eq!(store.inventory(product_id).await.unwrap().quantity_on_hand, 5);
}

#[tokio::test]
async fn test_credit_batch_continues_past_missing_product() {
    let store = Arc::new(InMemoryStockStore::new());
    let known = add_product(&store, "Widget", 1).await;
    let missing = Uuid::new_v4();
    let availability = StockAvailabilityService::new(store.clone());

    let err = availability
        .credit_stock(&[StockItem::new(missing, 1), StockItem::new(known, 2)])
        .await
        .unwrap_err();

    match err {
        StockServiceError::PartialFailure(report) => {
            assert_eq!(report.succeeded, 1);
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].key, missing);
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
    assert_eq!(store.inventory(known).await.unwrap().quantity_on_hand, 3);
    assert_eq!(store.product(known).await.unwrap().stock, 3);
}

#[tokio::test]
async fn test_sync_all_products_reports_counts() {
    let store = Arc::new(InMemoryStockStore::new());
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(add_product(&store, &format!("P{}", i), 10).await);
    }
    // Two products drift
    store.write_product_stock(ids[1], 7).await.unwrap();
    store.write_product_stock(ids[3], 0).await.unwrap();

    let sync = StockSyncService::new(store.clone(), 2);
    let report = sync.sync_all_products().await.unwrap();

    assert_eq!(report.checked, 5);
    assert_eq!(report.fixed, 2);
    assert_eq!(report.errors(), 0);
    for id in ids {
        assert_eq!(store.product(id).await.unwrap().stock, 10);
    }
}

#[tokio::test]
async fn test_cache_consistent_after_confirm() {
    let store = Arc::new(InMemoryStockStore::new());
    let product_id = add_product(&store, "Widget", 10).await;
    let reservations = StockReservationService::new(store.clone(), &ReservationConfig::default());
    let sync = StockSyncService::new(store.clone(), 100);
    let order_id = Uuid::new_v4();

    reservations
        .reserve_for_order(order_id, None, &[StockItem::new(product_id, 3)])
        .await
        .unwrap();
    reservations.confirm_reservations(order_id).await.unwrap();

    assert!(sync.validate_consistency(product_id).await.unwrap());
    let outcome = sync.sync_product_with_inventory(product_id).await.unwrap();
    assert!(!outcome.cache_rewritten);
    assert_eq!(store.product(product_id).await.unwrap().stock, 7);
}
