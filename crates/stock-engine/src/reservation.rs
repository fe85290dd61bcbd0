use chrono::{DateTime, Duration, Utc};
use common::config::ReservationConfig;
use common::metrics;
use domain::{
    merge_items, CartOwner, ProductStock, ReservationStatus, StockError, StockItem,
    StockReservation, StockShortage,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use stock_store::StockStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::write_through;
use crate::errors::{BatchReport, Result, StockServiceError};

/// Ledger figures and reservation counts for one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationStats {
    pub product_id: Uuid,
    pub on_hand: i32,
    pub reserved: i32,
    pub available: i32,
    pub active_reservations: i64,
    pub confirmed_reservations: i64,
    pub released_reservations: i64,
    pub expired_reservations: i64,
}

/// What a confirm section decided for one reservation
enum ConfirmOutcome {
    Confirmed { on_hand: i32 },
    Skipped,
    NotConfirmable(StockError),
}

/// Hold-based stock operations: carts and orders reserve units that are
/// later confirmed into permanent debits, released, or swept when expired.
pub struct StockReservationService<S: StockStore> {
    store: Arc<S>,
    ttl: Duration,
    cleanup_batch_size: i64,
}

impl<S: StockStore> StockReservationService<S> {
    pub fn new(store: Arc<S>, config: &ReservationConfig) -> Self {
        Self {
            store,
            ttl: config.default_ttl(),
            cleanup_batch_size: config.cleanup_batch_size,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Unlocked check; the answer may be stale by the time a hold is placed.
    pub async fn can_reserve(&self, product_id: Uuid, quantity: i32) -> Result<bool> {
        if quantity <= 0 {
            return Err(StockError::InvalidRequest(format!(
                "quantity must be positive, got {}",
                quantity
            ))
            .into());
        }

        let stock = self.store.load_stock(product_id).await?;
        if !stock.product.is_active {
            return Ok(false);
        }
        Ok(stock.available() >= quantity)
    }

    /// Place one hold if, under the product lock, the available stock covers it.
    pub async fn atomic_reserve(&self, reservation: StockReservation) -> Result<StockReservation> {
        let started = Instant::now();
        let product_id = reservation.product_id;
        let quantity = reservation.quantity;

        let result = self
            .store
            .exclusive(&[product_id], |section| {
                section.stock_mut(product_id)?.reserve(reservation)
            })
            .await
            .map_err(StockServiceError::from);

        metrics::record_stock_operation(
            "atomic_reserve",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        match &result {
            Ok(placed) => info!(
                reservation_id = %placed.id,
                product_id = %product_id,
                quantity,
                expires_at = %placed.expires_at,
                "Stock reserved"
            ),
            Err(e) if e.is_insufficient_stock() => {
                metrics::record_insufficient_stock("atomic_reserve");
                debug!(product_id = %product_id, quantity, "Reservation rejected: {}", e);
            }
            Err(e) => warn!(product_id = %product_id, quantity, error = %e, "Reservation failed"),
        }

        result
    }

    /// Hold every item for an order, all or nothing.
    ///
    /// Repeating the call is safe: a product already held for the order with
    /// the same quantity keeps its hold, a different quantity replaces it.
    pub async fn reserve_for_order(
        &self,
        order_id: Uuid,
        user_id: Option<Uuid>,
        items: &[StockItem],
    ) -> Result<Vec<StockReservation>> {
        let started = Instant::now();
        let items = merge_items(items)?;
        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let ttl = self.ttl;

        let result = self
            .store
            .exclusive(&product_ids, |section| {
                let now = section.now();
                let mut shortages = Vec::new();
                let mut placed = Vec::with_capacity(items.len());

                for item in &items {
                    let stock = section.stock_mut(item.product_id)?;
                    if let Some(hold) =
                        place_order_hold(stock, order_id, user_id, item, ttl, now, &mut shortages)?
                    {
                        placed.push(hold);
                    }
                }

                if shortages.is_empty() {
                    Ok(placed)
                } else {
                    Err(StockError::InsufficientStock(shortages))
                }
            })
            .await
            .map_err(StockServiceError::from);

        metrics::record_stock_operation(
            "reserve_for_order",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        match &result {
            Ok(placed) => info!(order_id = %order_id, reservations = placed.len(), "Order stock reserved"),
            Err(e) => {
                if e.is_insufficient_stock() {
                    metrics::record_insufficient_stock("reserve_for_order");
                }
                warn!(order_id = %order_id, error = %e, "Order reservation failed");
            }
        }

        result
    }

    /// Set the cart owner's hold on a product to `item.quantity`.
    pub async fn reserve_for_cart(
        &self,
        owner: &CartOwner,
        item: StockItem,
    ) -> Result<StockReservation> {
        if owner.is_anonymous() {
            return Err(StockError::InvalidRequest(
                "cart reservation requires a user or session id".to_string(),
            )
            .into());
        }
        let item = merge_items(&[item])?.remove(0);
        let product_id = item.product_id;
        let ttl = self.ttl;

        let placed = self
            .store
            .exclusive(&[product_id], |section| {
                let now = section.now();
                let stock = section.stock_mut(product_id)?;
                stock.release_where(|r| owner.owns(r), now);
                stock.reserve(StockReservation::for_cart(product_id, item.quantity, owner, ttl))
            })
            .await
            .map_err(|e| {
                let e = StockServiceError::from(e);
                if e.is_insufficient_stock() {
                    metrics::record_insufficient_stock("reserve_for_cart");
                }
                e
            })?;

        debug!(
            reservation_id = %placed.id,
            product_id = %product_id,
            quantity = placed.quantity,
            "Cart stock reserved"
        );
        Ok(placed)
    }

    /// Release every active cart hold of the owner
    pub async fn release_cart_reservations(&self, owner: &CartOwner) -> Result<usize> {
        let held = self.store.find_active_cart_reservations(owner).await?;
        let product_ids = distinct_products(&held);
        if product_ids.is_empty() {
            return Ok(0);
        }

        let released = self
            .store
            .exclusive(&product_ids, |section| {
                let now = section.now();
                Ok(section
                    .stocks_mut()
                    .map(|stock| stock.release_where(|r| owner.owns(r), now).len())
                    .sum::<usize>())
            })
            .await?;

        metrics::record_reservation_transition(ReservationStatus::Released.as_str(), released);
        info!(released, "Cart reservations released");
        Ok(released)
    }

    /// Turn each active hold of the order into a permanent debit.
    ///
    /// Every reservation is confirmed in its own section. Holds that are
    /// already terminal are skipped, so the call can be repeated. A hold found
    /// past its expiry is marked expired and reported in the failures.
    pub async fn confirm_reservations(&self, order_id: Uuid) -> Result<usize> {
        let started = Instant::now();
        let pending: Vec<StockReservation> = self
            .store
            .find_reservations_by_order(order_id)
            .await?
            .into_iter()
            .filter(StockReservation::is_active)
            .collect();

        if pending.is_empty() {
            debug!(order_id = %order_id, "No active reservations to confirm");
            return Ok(0);
        }

        let mut report = BatchReport::new();
        let mut expired = 0;

        for reservation in &pending {
            let product_id = reservation.product_id;
            let reservation_id = reservation.id;

            let outcome = self
                .store
                .exclusive(&[product_id], |section| {
                    let now = section.now();
                    let stock = section.stock_mut(product_id)?;
                    match stock.confirm(reservation_id, now) {
                        Ok(Some(_)) => Ok(ConfirmOutcome::Confirmed {
                            on_hand: stock.on_hand(),
                        }),
                        Ok(None) => Ok(ConfirmOutcome::Skipped),
                        // Committed so the hold stays expired
                        Err(e @ StockError::ReservationNotConfirmable { .. }) => {
                            Ok(ConfirmOutcome::NotConfirmable(e))
                        }
                        Err(e) => Err(e),
                    }
                })
                .await;

            match outcome {
                Ok(ConfirmOutcome::Confirmed { on_hand }) => {
                    info!(
                        order_id = %order_id,
                        reservation_id = %reservation_id,
                        product_id = %product_id,
                        quantity = reservation.quantity,
                        on_hand,
                        "Reservation confirmed"
                    );
                    write_through(self.store.as_ref(), product_id, on_hand, "confirm_reservations")
                        .await;
                    report.record_success();
                }
                Ok(ConfirmOutcome::Skipped) => {
                    debug!(reservation_id = %reservation_id, "Reservation no longer active, skipped");
                }
                Ok(ConfirmOutcome::NotConfirmable(e)) => {
                    warn!(order_id = %order_id, reservation_id = %reservation_id, error = %e, "Reservation expired before confirmation");
                    expired += 1;
                    report.record_failure(reservation_id, &e);
                }
                Err(e) => {
                    error!(order_id = %order_id, reservation_id = %reservation_id, error = %e, "Reservation confirmation failed");
                    report.record_failure(reservation_id, &e);
                }
            }
        }

        metrics::record_reservation_transition(
            ReservationStatus::Confirmed.as_str(),
            report.succeeded,
        );
        metrics::record_reservation_transition(ReservationStatus::Expired.as_str(), expired);
        metrics::record_stock_operation(
            "confirm_reservations",
            report.is_clean(),
            started.elapsed().as_secs_f64(),
        );

        report.into_result().map(|report| report.succeeded)
    }

    /// Release the order's active holds; on-hand stock is untouched
    pub async fn release_reservations(&self, order_id: Uuid) -> Result<usize> {
        let active: Vec<StockReservation> = self
            .store
            .find_reservations_by_order(order_id)
            .await?
            .into_iter()
            .filter(StockReservation::is_active)
            .collect();
        let product_ids = distinct_products(&active);
        if product_ids.is_empty() {
            return Ok(0);
        }

        let released = self
            .store
            .exclusive(&product_ids, |section| {
                let now = section.now();
                Ok(section
                    .stocks_mut()
                    .map(|stock| stock.release_where(|r| r.belongs_to_order(order_id), now).len())
                    .sum::<usize>())
            })
            .await?;

        metrics::record_reservation_transition(ReservationStatus::Released.as_str(), released);
        info!(order_id = %order_id, released, "Order reservations released");
        Ok(released)
    }

    /// Move the user's cart holds on the item products to order holds.
    ///
    /// Runs in one section: the cart holds are released first, then the full
    /// quantity of every item is checked and held for the order. Any shortage
    /// rolls the whole transfer back and the cart holds stay active.
    pub async fn transfer_cart_reservations_to_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        items: &[StockItem],
    ) -> Result<Vec<StockReservation>> {
        let started = Instant::now();
        let items = merge_items(items)?;
        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let owner = CartOwner::user(user_id);
        let ttl = self.ttl;

        let result = self
            .store
            .exclusive(&product_ids, |section| {
                let now = section.now();
                let mut shortages = Vec::new();
                let mut placed = Vec::with_capacity(items.len());
                let mut released = 0;

                for item in &items {
                    let stock = section.stock_mut(item.product_id)?;
                    released += stock.release_where(|r| owner.owns(r), now).len();
                    if let Some(hold) = place_order_hold(
                        stock,
                        order_id,
                        Some(user_id),
                        item,
                        ttl,
                        now,
                        &mut shortages,
                    )? {
                        placed.push(hold);
                    }
                }

                if shortages.is_empty() {
                    Ok((placed, released))
                } else {
                    Err(StockError::InsufficientStock(shortages))
                }
            })
            .await
            .map_err(StockServiceError::from);

        metrics::record_stock_operation(
            "transfer_cart_reservations",
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        match result {
            Ok((placed, released)) => {
                metrics::record_reservation_transition(
                    ReservationStatus::Released.as_str(),
                    released,
                );
                info!(
                    order_id = %order_id,
                    user_id = %user_id,
                    cart_holds_released = released,
                    order_holds = placed.len(),
                    "Cart reservations transferred to order"
                );
                Ok(placed)
            }
            Err(e) => {
                if e.is_insufficient_stock() {
                    metrics::record_insufficient_stock("transfer_cart_reservations");
                }
                warn!(order_id = %order_id, user_id = %user_id, error = %e, "Cart transfer rolled back");
                Err(e)
            }
        }
    }

    /// Push the expiry of the order's active holds `minutes` further out
    pub async fn extend_reservation(&self, order_id: Uuid, minutes: i64) -> Result<usize> {
        if minutes <= 0 {
            return Err(StockError::InvalidRequest(format!(
                "extension must be a positive number of minutes, got {}",
                minutes
            ))
            .into());
        }

        let active: Vec<StockReservation> = self
            .store
            .find_reservations_by_order(order_id)
            .await?
            .into_iter()
            .filter(StockReservation::is_active)
            .collect();
        let product_ids = distinct_products(&active);
        if product_ids.is_empty() {
            return Ok(0);
        }

        let by = Duration::minutes(minutes);
        let extended = self
            .store
            .exclusive(&product_ids, |section| {
                let now = section.now();
                Ok(section
                    .stocks_mut()
                    .map(|stock| stock.extend_where(|r| r.belongs_to_order(order_id), by, now))
                    .sum::<usize>())
            })
            .await?;

        info!(order_id = %order_id, minutes, extended, "Reservations extended");
        Ok(extended)
    }

    /// Expire active holds past their expiry, one bounded batch of products per run
    pub async fn cleanup_expired_reservations(&self) -> Result<usize> {
        let started = Instant::now();
        let product_ids = self
            .store
            .find_products_with_due_reservations(Utc::now(), self.cleanup_batch_size)
            .await?;

        let mut report = BatchReport::new();
        let mut expired = 0;

        for product_id in product_ids {
            let result = self
                .store
                .exclusive(&[product_id], |section| {
                    let now = section.now();
                    Ok(section.stock_mut(product_id)?.expire_due(now).len())
                })
                .await;

            match result {
                Ok(count) => {
                    debug!(product_id = %product_id, expired = count, "Expired reservations swept");
                    expired += count;
                    report.record_success();
                }
                Err(e) => {
                    error!(product_id = %product_id, error = %e, "Expiry sweep failed for product");
                    report.record_failure(product_id, &e);
                }
            }
        }

        metrics::record_reservation_transition(ReservationStatus::Expired.as_str(), expired);
        metrics::record_stock_operation(
            "cleanup_expired_reservations",
            report.is_clean(),
            started.elapsed().as_secs_f64(),
        );

        if expired > 0 {
            info!(expired, products = report.total(), "Expired reservations cleaned up");
        }
        report.into_result().map(|_| expired)
    }

    pub async fn get_reservation_stats(&self, product_id: Uuid) -> Result<ReservationStats> {
        let stock = self.store.load_stock(product_id).await?;
        let counts = self.store.reservation_counts(product_id).await?;

        Ok(ReservationStats {
            product_id,
            on_hand: stock.on_hand(),
            reserved: stock.reserved(),
            available: stock.available(),
            active_reservations: counts.active,
            confirmed_reservations: counts.confirmed,
            released_reservations: counts.released,
            expired_reservations: counts.expired,
        })
    }

    /// Every reservation of the order, whatever its status
    pub async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<StockReservation>> {
        Ok(self.store.find_reservations_by_order(order_id).await?)
    }
}

/// Hold `item` for the order on `stock`, or record the shortage.
///
/// An active hold of the order with the same quantity is kept as is. One with
/// a different quantity is released first so it does not count against the
/// replacement.
fn place_order_hold(
    stock: &mut ProductStock,
    order_id: Uuid,
    user_id: Option<Uuid>,
    item: &StockItem,
    ttl: Duration,
    now: DateTime<Utc>,
    shortages: &mut Vec<StockShortage>,
) -> std::result::Result<Option<StockReservation>, StockError> {
    stock.ensure_sellable()?;

    if let Some(existing) = stock
        .active_reservations()
        .find(|r| {
            r.belongs_to_order(order_id) && r.quantity == item.quantity && r.expires_at > now
        })
    {
        return Ok(Some(existing.clone()));
    }
    stock.release_where(|r| r.belongs_to_order(order_id), now);

    if let Some(shortage) = stock.shortage(item.quantity) {
        shortages.push(shortage);
        return Ok(None);
    }

    let hold = StockReservation::for_order(item.product_id, item.quantity, order_id, user_id, ttl);
    stock.reserve(hold).map(Some)
}

fn distinct_products(reservations: &[StockReservation]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = reservations.iter().map(|r| r.product_id).collect();
    ids.sort();
    ids.dedup();
    ids
}
