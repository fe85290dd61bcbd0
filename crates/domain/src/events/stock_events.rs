use super::DomainEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregates::reservation::StockReservation;
use crate::commands::stock_commands::StockItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub reservation_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

impl From<&StockReservation> for ReservedLine {
    fn from(reservation: &StockReservation) -> Self {
        Self {
            reservation_id: reservation.id,
            product_id: reservation.product_id,
            quantity: reservation.quantity,
            expires_at: reservation.expires_at,
        }
    }
}

/// Stock was held for an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservedEvent {
    pub order_id: Uuid,
    pub lines: Vec<ReservedLine>,
    pub transferred_from_cart: bool,
    pub reserved_at: DateTime<Utc>,
}

impl DomainEvent for StockReservedEvent {
    fn event_type() -> &'static str {
        "StockReserved"
    }
}

/// Stock was taken directly from the ledger, without holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockDebitedEvent {
    pub order_id: Uuid,
    pub items: Vec<StockItem>,
    pub debited_at: DateTime<Utc>,
}

impl DomainEvent for StockDebitedEvent {
    fn event_type() -> &'static str {
        "StockDebited"
    }
}

/// Holds were turned into permanent debits after payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockConfirmedEvent {
    pub order_id: Uuid,
    pub confirmed: usize,
    pub confirmed_at: DateTime<Utc>,
}

impl DomainEvent for StockConfirmedEvent {
    fn event_type() -> &'static str {
        "StockConfirmed"
    }
}

/// Active holds were given back (compensation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationsReleasedEvent {
    pub order_id: Uuid,
    pub released: usize,
    pub reason: String,
    pub released_at: DateTime<Utc>,
}

impl DomainEvent for ReservationsReleasedEvent {
    fn event_type() -> &'static str {
        "ReservationsReleased"
    }
}

/// Permanently debited units were put back on hand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRestoredEvent {
    pub order_id: Uuid,
    pub items: Vec<StockItem>,
    pub reason: String,
    pub restored_at: DateTime<Utc>,
}

impl DomainEvent for StockRestoredEvent {
    fn event_type() -> &'static str {
        "StockRestored"
    }
}
