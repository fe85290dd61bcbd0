use domain::StockItem;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{OrderFlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an order takes its stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockMode {
    /// Holds at creation, permanent debit on payment
    Reserved,
    /// Permanent debit at creation
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: f64,
}

impl OrderLine {
    pub fn new(product_id: Uuid, quantity: i32, unit_price: f64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    pub fn total_price(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// The parts of an order the stock workflow needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub lines: Vec<OrderLine>,
    pub status: OrderStatus,
    pub stock_mode: StockMode,
    /// Units taken off hand at creation in direct mode
    #[serde(default)]
    pub debited: Vec<StockItem>,
}

impl OrderSnapshot {
    pub fn new(user_id: Option<Uuid>, lines: Vec<OrderLine>, stock_mode: StockMode) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            user_id,
            lines,
            status: OrderStatus::Pending,
            stock_mode,
            debited: Vec::new(),
        }
    }

    pub fn items(&self) -> Vec<StockItem> {
        self.lines
            .iter()
            .map(|line| StockItem::new(line.product_id, line.quantity))
            .collect()
    }

    pub fn total_amount(&self) -> f64 {
        self.lines.iter().map(OrderLine::total_price).sum()
    }

    /// Fails without changing anything when `to` is not reachable
    pub fn ensure_can_transition(&self, to: OrderStatus) -> Result<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderFlowError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Refunded));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn test_snapshot_items_and_total() {
        let product_id = Uuid::new_v4();
        let order = OrderSnapshot::new(
            None,
            vec![OrderLine::new(product_id, 2, 10.0), OrderLine::new(product_id, 1, 5.0)],
            StockMode::Direct,
        );

        assert_eq!(order.items().len(), 2);
        assert_eq!(order.total_amount(), 25.0);
        assert!(order.ensure_can_transition(OrderStatus::Refunded).is_err());
    }
}
