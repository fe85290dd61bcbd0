use chrono::{DateTime, Utc};
use domain::events::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::{OrderLine, StockMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub lines: Vec<OrderLine>,
    pub stock_mode: StockMode,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for OrderCreatedEvent {
    fn event_type() -> &'static str {
        "OrderCreated"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedEvent {
    pub order_id: Uuid,
    pub confirmed_at: DateTime<Utc>,
}

impl DomainEvent for PaymentConfirmedEvent {
    fn event_type() -> &'static str {
        "PaymentConfirmed"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl DomainEvent for OrderCancelledEvent {
    fn event_type() -> &'static str {
        "OrderCancelled"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRefundedEvent {
    pub order_id: Uuid,
    pub refunded_at: DateTime<Utc>,
}

impl DomainEvent for OrderRefundedEvent {
    fn event_type() -> &'static str {
        "OrderRefunded"
    }
}
