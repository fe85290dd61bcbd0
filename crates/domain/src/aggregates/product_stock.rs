use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregates::inventory::{Inventory, InventoryViolation};
use crate::aggregates::reservation::StockReservation;
use crate::errors::{StockError, StockShortage};

/// The catalog side of a product as far as stock is concerned.
/// `stock` is a cached copy of the ledger's on-hand figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub stock: i32,
    pub is_active: bool,
}

impl ProductRecord {
    pub fn new(name: impl Into<String>, stock: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            stock,
            is_active: true,
        }
    }
}

/// Everything needed to decide a stock mutation for one product: the cached
/// product row, its ledger row and the holds currently active against it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductStock {
    pub product: ProductRecord,
    pub inventory: Inventory,
    pub reservations: Vec<StockReservation>,
}

impl ProductStock {
    /// Without a ledger row the inventory is seeded from the cached counter.
    pub fn new(
        product: ProductRecord,
        inventory: Option<Inventory>,
        reservations: Vec<StockReservation>,
    ) -> Self {
        let inventory = inventory.unwrap_or_else(|| Inventory::new(product.id, product.stock));
        let reservations = reservations
            .into_iter()
            .filter(|r| r.product_id == product.id)
            .collect();
        Self {
            product,
            inventory,
            reservations,
        }
    }

    pub fn product_id(&self) -> Uuid {
        self.product.id
    }

    pub fn on_hand(&self) -> i32 {
        self.inventory.quantity_on_hand
    }

    pub fn active_reservations(&self) -> impl Iterator<Item = &StockReservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }

    /// Sum of active holds
    pub fn reserved(&self) -> i32 {
        self.active_reservations().map(|r| r.quantity).sum()
    }

    pub fn available(&self) -> i32 {
        self.inventory.available_after(self.reserved())
    }

    pub fn ensure_sellable(&self) -> Result<(), StockError> {
        if self.product.is_active {
            Ok(())
        } else {
            Err(StockError::unavailable(self.product.id, "product is not active"))
        }
    }

    pub fn shortage(&self, quantity: i32) -> Option<StockShortage> {
        let available = self.available();
        (available < quantity).then(|| StockShortage {
            product_id: self.product.id,
            requested: quantity,
            available,
        })
    }

    pub fn check(&self, quantity: i32) -> Result<(), StockError> {
        match self.shortage(quantity) {
            Some(shortage) => Err(StockError::InsufficientStock(vec![shortage])),
            None => Ok(()),
        }
    }

    /// Places a hold if the available stock covers it
    pub fn reserve(&mut self, reservation: StockReservation) -> Result<StockReservation, StockError> {
        reservation.validate()?;
        if reservation.product_id != self.product.id {
            return Err(StockError::InvalidRequest(format!(
                "reservation for product {} placed against product {}",
                reservation.product_id, self.product.id
            )));
        }
        self.ensure_sellable()?;
        self.check(reservation.quantity)?;

        self.reservations.push(reservation.clone());
        self.refresh();
        Ok(reservation)
    }

    /// Permanently removes units that are not held by anyone
    pub fn debit(&mut self, quantity: i32) -> Result<i32, StockError> {
        ensure_positive(quantity)?;
        self.ensure_sellable()?;
        self.check(quantity)?;

        self.inventory.quantity_on_hand -= quantity;
        self.refresh();
        Ok(self.on_hand())
    }

    /// Puts units back on hand (cancellation or refund)
    pub fn credit(&mut self, quantity: i32) -> Result<i32, StockError> {
        ensure_positive(quantity)?;
        self.inventory.quantity_on_hand = self
            .inventory
            .quantity_on_hand
            .checked_add(quantity)
            .ok_or_else(|| {
                StockError::InvalidRequest(format!("credit of {} overflows on-hand", quantity))
            })?;
        self.refresh();
        Ok(self.on_hand())
    }

    /// Turns an active hold into a permanent debit.
    ///
    /// Returns `Ok(None)` when the reservation is no longer active here, which
    /// makes repeated confirmation a no-op. A hold past its expiry is marked
    /// expired and reported as not confirmable.
    pub fn confirm(
        &mut self,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, StockError> {
        let Some(index) = self
            .reservations
            .iter()
            .position(|r| r.id == reservation_id && r.is_active())
        else {
            return Ok(None);
        };

        if self.reservations[index].expires_at <= now {
            let expires_at = self.reservations[index].expires_at;
            self.reservations[index].expire(now)?;
            self.refresh();
            return Err(StockError::ReservationNotConfirmable {
                reservation_id,
                reason: format!("expired at {}", expires_at),
            });
        }

        let quantity = self.reservations[index].quantity;
        if self.inventory.quantity_on_hand < quantity {
            return Err(StockError::InconsistentInventoryData {
                product_id: self.product.id,
                detail: format!(
                    "reservation {} holds {} units but only {} on hand",
                    reservation_id, quantity, self.inventory.quantity_on_hand
                ),
            });
        }

        self.inventory.quantity_on_hand -= quantity;
        self.reservations[index].confirm(now)?;
        self.refresh();
        Ok(Some(quantity))
    }

    /// Releases every active hold matching `predicate`, returning their ids
    pub fn release_where<F>(&mut self, predicate: F, now: DateTime<Utc>) -> Vec<Uuid>
    where
        F: Fn(&StockReservation) -> bool,
    {
        let mut released = Vec::new();
        for reservation in self.reservations.iter_mut() {
            if reservation.is_active() && predicate(reservation) && reservation.release(now).is_ok()
            {
                released.push(reservation.id);
            }
        }
        self.refresh();
        released
    }

    /// Moves every hold past its expiry to `Expired`
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut expired = Vec::new();
        for reservation in self.reservations.iter_mut() {
            if reservation.is_due(now) && reservation.expire(now).is_ok() {
                expired.push(reservation.id);
            }
        }
        self.refresh();
        expired
    }

    pub fn extend_where<F>(&mut self, predicate: F, by: Duration, now: DateTime<Utc>) -> usize
    where
        F: Fn(&StockReservation) -> bool,
    {
        self.reservations
            .iter_mut()
            .filter(|r| r.is_active() && predicate(r))
            .filter_map(|r| r.extend(by, now).ok())
            .count()
    }

    /// Recomputes the ledger's derived figures from the active holds
    pub fn refresh(&mut self) -> Vec<InventoryViolation> {
        let reserved = self.reserved();
        self.inventory.recompute(reserved)
    }

    pub fn is_cache_consistent(&self) -> bool {
        self.product.stock == self.inventory.quantity_on_hand
    }
}

fn ensure_positive(quantity: i32) -> Result<(), StockError> {
    if quantity > 0 {
        Ok(())
    } else {
        Err(StockError::InvalidRequest(format!(
            "quantity must be positive, got {}",
            quantity
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::reservation::{CartOwner, ReservationStatus};

    fn stock_with(on_hand: i32) -> ProductStock {
        let product = ProductRecord::new("Widget", on_hand);
        let inventory = Inventory::new(product.id, on_hand);
        ProductStock::new(product, Some(inventory), Vec::new())
    }

    fn hold(stock: &ProductStock, quantity: i32) -> StockReservation {
        StockReservation::for_order(
            stock.product_id(),
            quantity,
            Uuid::new_v4(),
            None,
            Duration::minutes(30),
        )
    }

    #[test]
    fn test_missing_inventory_seeds_from_cache() {
        let product = ProductRecord::new("Widget", 7);
        let stock = ProductStock::new(product, None, Vec::new());
        assert_eq!(stock.on_hand(), 7);
        assert_eq!(stock.available(), 7);
    }

    #[test]
    fn test_reserve_then_confirm_scenario() {
        let now = Utc::now();
        let mut stock = stock_with(10);

        let first = stock.reserve(hold(&stock, 4)).unwrap();
        assert_eq!(stock.available(), 6);
        assert_eq!(stock.inventory.quantity_reserved, 4);

        let err = stock.reserve(hold(&stock, 7)).unwrap_err();
        assert_eq!(err.shortages()[0].available, 6);

        assert_eq!(stock.confirm(first.id, now).unwrap(), Some(4));
        assert_eq!(stock.on_hand(), 6);
        assert_eq!(stock.inventory.quantity_reserved, 0);
        assert_eq!(stock.available(), 6);

        // Confirming again and releasing a confirmed hold change nothing
        assert_eq!(stock.confirm(first.id, now).unwrap(), None);
        assert!(stock.release_where(|r| r.id == first.id, now).is_empty());
        assert_eq!(stock.on_hand(), 6);
    }

    #[test]
    fn test_confirm_expired_hold_marks_it_expired() {
        let now = Utc::now();
        let mut stock = stock_with(5);
        let late = hold(&stock, 2).with_expiry(now - Duration::minutes(1));
        stock.reservations.push(late.clone());

        let err = stock.confirm(late.id, now).unwrap_err();
        assert!(matches!(err, StockError::ReservationNotConfirmable { .. }));
        assert_eq!(stock.reservations[0].status, ReservationStatus::Expired);
        assert_eq!(stock.on_hand(), 5);
        assert_eq!(stock.available(), 5);
    }

    #[test]
    fn test_debit_cannot_take_held_units() {
        let mut stock = stock_with(5);
        stock.reserve(hold(&stock, 3)).unwrap();

        assert!(stock.debit(3).is_err());
        assert_eq!(stock.debit(2).unwrap(), 3);
        assert_eq!(stock.available(), 0);
    }

    #[test]
    fn test_inactive_product_cannot_be_sold() {
        let mut stock = stock_with(5);
        stock.product.is_active = false;

        assert!(matches!(
            stock.debit(1),
            Err(StockError::ProductUnavailable { .. })
        ));
        assert!(stock.reserve(hold(&stock, 1)).is_err());
        assert_eq!(stock.credit(2).unwrap(), 7);
    }

    #[test]
    fn test_release_frees_capacity_without_touching_on_hand() {
        let now = Utc::now();
        let mut stock = stock_with(8);
        let owner = CartOwner::user(Uuid::new_v4());
        let cart = StockReservation::for_cart(stock.product_id(), 5, &owner, Duration::minutes(15));
        stock.reserve(cart).unwrap();
        assert_eq!(stock.available(), 3);

        let released = stock.release_where(|r| owner.owns(r), now);
        assert_eq!(released.len(), 1);
        assert_eq!(stock.available(), 8);
        assert_eq!(stock.on_hand(), 8);
    }

    #[test]
    fn test_expire_due_only_touches_past_holds() {
        let now = Utc::now();
        let mut stock = stock_with(10);
        let stale = hold(&stock, 2).with_expiry(now - Duration::seconds(5));
        let fresh = hold(&stock, 3);
        stock.reservations.push(stale.clone());
        stock.reservations.push(fresh);
        stock.refresh();
        assert_eq!(stock.available(), 5);

        let expired = stock.expire_due(now);
        assert_eq!(expired, vec![stale.id]);
        assert_eq!(stock.available(), 7);
    }

    #[test]
    fn test_refresh_reports_over_reservation() {
        let mut stock = stock_with(4);
        stock.reserve(hold(&stock, 4)).unwrap();
        stock.inventory.quantity_on_hand = 2;

        let violations = stock.refresh();
        assert_eq!(violations.len(), 1);
        assert_eq!(stock.inventory.quantity_available, 0);
    }
}
