//! Stock domain model: inventory ledger rows, reservations and the per-product
//! aggregate every stock mutation runs against. No I/O lives here.

pub mod aggregates;
pub mod commands;
pub mod errors;
pub mod events;

pub use aggregates::inventory::{Inventory, InventoryViolation, ViolationKind};
pub use aggregates::product_stock::{ProductRecord, ProductStock};
pub use aggregates::reservation::{
    CartOwner, ReservationStatus, ReservationType, StockReservation,
    DEFAULT_RESERVATION_TTL_MINUTES,
};
pub use commands::stock_commands::{merge_items, StockItem};
pub use errors::{StockError, StockShortage};
