pub mod coordinator;
pub mod errors;
pub mod events;
pub mod order;
pub mod timeline;

pub use coordinator::{OrderStockCoordinator, StockPlacement};
pub use errors::OrderFlowError;
pub use order::{OrderLine, OrderSnapshot, OrderStatus, StockMode};
pub use timeline::{OrderEvent, OrderEventLog, PostgresOrderEventLog, TimelineError};
