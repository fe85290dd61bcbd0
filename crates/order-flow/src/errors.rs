use domain::StockItem;
use stock_engine::StockServiceError;
use thiserror::Error;
use uuid::Uuid;

use crate::order::OrderStatus;
use crate::timeline::TimelineError;

#[derive(Debug, Error)]
pub enum OrderFlowError {
    #[error(transparent)]
    Stock(#[from] StockServiceError),

    #[error("Invalid order status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order {order_id} holds no confirmed stock for {} line(s)", .missing.len())]
    StockNotSecured { order_id: Uuid, missing: Vec<StockItem> },

    #[error("Timeline error: {0}")]
    Timeline(#[from] TimelineError),
}

pub type Result<T> = std::result::Result<T, OrderFlowError>;
