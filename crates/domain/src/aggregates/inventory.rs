use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::StockError;

/// Authoritative stock ledger row for one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity_on_hand: i32,
    pub quantity_reserved: i32,
    pub quantity_available: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    NegativeOnHand,
    ReservedExceedsOnHand,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::NegativeOnHand => "negative_on_hand",
            ViolationKind::ReservedExceedsOnHand => "reserved_exceeds_on_hand",
        }
    }
}

/// An invariant breach found (and corrected) while recomputing an inventory row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryViolation {
    pub product_id: Uuid,
    pub kind: ViolationKind,
    pub quantity_on_hand: i32,
    pub quantity_reserved: i32,
}

impl fmt::Display for InventoryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::NegativeOnHand => write!(
                f,
                "on-hand quantity {} is negative, clamped to 0",
                self.quantity_on_hand
            ),
            ViolationKind::ReservedExceedsOnHand => write!(
                f,
                "reserved quantity {} exceeds on-hand quantity {}, available forced to 0",
                self.quantity_reserved, self.quantity_on_hand
            ),
        }
    }
}

impl InventoryViolation {
    pub fn to_error(&self) -> StockError {
        StockError::InconsistentInventoryData {
            product_id: self.product_id,
            detail: self.to_string(),
        }
    }
}

impl Inventory {
    /// First inventory setup for a product
    pub fn new(product_id: Uuid, quantity_on_hand: i32) -> Self {
        let on_hand = quantity_on_hand.max(0);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity_on_hand: on_hand,
            quantity_reserved: 0,
            quantity_available: on_hand,
            created_at: now,
            updated_at: now,
        }
    }

    /// Units left once `reserved` units are held, never below zero
    pub fn available_after(&self, reserved: i32) -> i32 {
        (self.quantity_on_hand - reserved).max(0)
    }

    /// Recomputes reserved and available from the active hold total,
    /// correcting any invariant breach it finds.
    pub fn recompute(&mut self, reserved: i32) -> Vec<InventoryViolation> {
        let mut violations = Vec::new();

        if self.quantity_on_hand < 0 {
            violations.push(InventoryViolation {
                product_id: self.product_id,
                kind: ViolationKind::NegativeOnHand,
                quantity_on_hand: self.quantity_on_hand,
                quantity_reserved: reserved,
            });
            self.quantity_on_hand = 0;
        }

        self.quantity_reserved = reserved.max(0);

        if self.quantity_reserved > self.quantity_on_hand {
            violations.push(InventoryViolation {
                product_id: self.product_id,
                kind: ViolationKind::ReservedExceedsOnHand,
                quantity_on_hand: self.quantity_on_hand,
                quantity_reserved: self.quantity_reserved,
            });
            self.quantity_available = 0;
        } else {
            self.quantity_available = self.quantity_on_hand - self.quantity_reserved;
        }

        violations
    }

    /// True when the stored quantities agree with each other
    pub fn is_consistent(&self) -> bool {
        self.quantity_on_hand >= 0
            && self.quantity_reserved <= self.quantity_on_hand
            && self.quantity_available == self.available_after(self.quantity_reserved)
    }

    /// Compares the ledger figures, ignoring timestamps
    pub fn same_quantities(&self, other: &Inventory) -> bool {
        self.quantity_on_hand == other.quantity_on_hand
            && self.quantity_reserved == other.quantity_reserved
            && self.quantity_available == other.quantity_available
    }
}
