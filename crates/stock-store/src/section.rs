use chrono::{DateTime, Utc};
use domain::{Inventory, InventoryViolation, ProductStock, StockError, StockReservation};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;
use uuid::Uuid;

/// The products locked by one exclusive section, keyed by product id
#[derive(Debug)]
pub struct StockSection {
    now: DateTime<Utc>,
    stocks: BTreeMap<Uuid, ProductStock>,
}

impl StockSection {
    pub fn new(now: DateTime<Utc>, stocks: impl IntoIterator<Item = ProductStock>) -> Self {
        Self {
            now,
            stocks: stocks.into_iter().map(|s| (s.product_id(), s)).collect(),
        }
    }

    /// Clock reading taken when the locks were acquired
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        self.stocks.keys().copied().collect()
    }

    pub fn stock(&self, product_id: Uuid) -> Result<&ProductStock, StockError> {
        self.stocks
            .get(&product_id)
            .ok_or_else(|| not_locked(product_id))
    }

    pub fn stock_mut(&mut self, product_id: Uuid) -> Result<&mut ProductStock, StockError> {
        self.stocks
            .get_mut(&product_id)
            .ok_or_else(|| not_locked(product_id))
    }

    pub fn stocks_mut(&mut self) -> impl Iterator<Item = &mut ProductStock> {
        self.stocks.values_mut()
    }

    pub(crate) fn into_stocks(self) -> BTreeMap<Uuid, ProductStock> {
        self.stocks
    }
}

fn not_locked(product_id: Uuid) -> StockError {
    StockError::InvalidRequest(format!(
        "product {} is not part of this exclusive section",
        product_id
    ))
}

/// Rows to write when an exclusive section commits
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub inventory_inserts: Vec<Inventory>,
    pub inventory_updates: Vec<Inventory>,
    pub reservation_inserts: Vec<StockReservation>,
    pub reservation_updates: Vec<StockReservation>,
    pub violations: Vec<InventoryViolation>,
}

impl ChangeSet {
    /// Compares the stocks after a section against what was loaded.
    ///
    /// `persisted` names the products whose ledger row already exists; the
    /// others get their seeded row inserted. Derived quantities are
    /// recomputed first so a stored breach is corrected even when the section
    /// changed nothing else.
    pub fn diff(
        originals: &BTreeMap<Uuid, ProductStock>,
        persisted: &HashSet<Uuid>,
        current: BTreeMap<Uuid, ProductStock>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut changes = ChangeSet::default();

        for (product_id, mut stock) in current {
            changes.violations.extend(stock.refresh());
            let original = originals.get(&product_id);

            if !persisted.contains(&product_id) {
                stock.inventory.updated_at = now;
                changes.inventory_inserts.push(stock.inventory.clone());
            } else if original.map_or(true, |o| !o.inventory.same_quantities(&stock.inventory)) {
                stock.inventory.updated_at = now;
                changes.inventory_updates.push(stock.inventory.clone());
            }

            for reservation in stock.reservations {
                let before = original.and_then(|o| {
                    o.reservations.iter().find(|r| r.id == reservation.id)
                });
                match before {
                    None => changes.reservation_inserts.push(reservation),
                    Some(before) if *before != reservation => {
                        changes.reservation_updates.push(reservation)
                    }
                    Some(_) => {}
                }
            }
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.inventory_inserts.is_empty()
            && self.inventory_updates.is_empty()
            && self.reservation_inserts.is_empty()
            && self.reservation_updates.is_empty()
    }

    /// Log and count every invariant breach that was corrected
    pub fn report_violations(&self) {
        for violation in &self.violations {
            warn!(
                product_id = %violation.product_id,
                kind = violation.kind.as_str(),
                quantity_on_hand = violation.quantity_on_hand,
                quantity_reserved = violation.quantity_reserved,
                "Inventory invariant violated, corrected: {}",
                violation
            );
            common::metrics::record_invariant_violation(violation.kind.as_str());
        }
    }
}
