use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// One item that could not be served from the available stock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub product_id: Uuid,
    pub requested: i32,
    pub available: i32,
}

impl fmt::Display for StockShortage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "product {} requested {} but only {} available",
            self.product_id, self.requested, self.available
        )
    }
}

fn describe_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Business-rule failures raised by stock operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StockError {
    #[error("Insufficient stock: {}", describe_shortages(.0))]
    InsufficientStock(Vec<StockShortage>),

    #[error("Product {product_id} is unavailable: {reason}")]
    ProductUnavailable { product_id: Uuid, reason: String },

    #[error("Inconsistent inventory data for product {product_id}: {detail}")]
    InconsistentInventoryData { product_id: Uuid, detail: String },

    #[error("Reservation {reservation_id} cannot be confirmed: {reason}")]
    ReservationNotConfirmable { reservation_id: Uuid, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StockError {
    pub fn insufficient(product_id: Uuid, requested: i32, available: i32) -> Self {
        StockError::InsufficientStock(vec![StockShortage {
            product_id,
            requested,
            available,
        }])
    }

    pub fn unavailable(product_id: Uuid, reason: impl Into<String>) -> Self {
        StockError::ProductUnavailable {
            product_id,
            reason: reason.into(),
        }
    }

    /// Shortages carried by an `InsufficientStock` error
    pub fn shortages(&self) -> &[StockShortage] {
        match self {
            StockError::InsufficientStock(shortages) => shortages,
            _ => &[],
        }
    }
}
