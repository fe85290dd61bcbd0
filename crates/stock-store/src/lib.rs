pub mod memory;
pub mod postgres_stock_store;
pub mod section;

pub use memory::InMemoryStockStore;
pub use postgres_stock_store::PostgresStockStore;
pub use section::{ChangeSet, StockSection};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CartOwner, ProductStock, ReservationStatus, StockError, StockReservation};
use thiserror::Error;
use uuid::Uuid;

/// Storage for the inventory ledger, reservations and the product stock cache.
///
/// Every mutation of ledger rows or reservations goes through [`StockStore::exclusive`].
/// The remaining methods are unlocked reads plus the cache write.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Run `f` while holding exclusive locks on the given products.
    ///
    /// Locks are taken in ascending product id order. The section handed to
    /// `f` holds each product's cached row, ledger row and active holds. If
    /// `f` fails nothing is written; otherwise derived quantities are
    /// recomputed and every change is committed in one transaction.
    async fn exclusive<T, F>(&self, product_ids: &[Uuid], f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StockSection) -> Result<T, StockError> + Send,
        T: Send;

    /// Unlocked snapshot of one product's stock
    async fn load_stock(&self, product_id: Uuid) -> Result<ProductStock, StoreError>;

    /// Overwrite the cached stock counter on the product row
    async fn write_product_stock(&self, product_id: Uuid, stock: i32) -> Result<(), StoreError>;

    /// All reservations of an order, whatever their status
    async fn find_reservations_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<StockReservation>, StoreError>;

    /// Active cart holds of a user or session
    async fn find_active_cart_reservations(
        &self,
        owner: &CartOwner,
    ) -> Result<Vec<StockReservation>, StoreError>;

    /// Products that have active holds expiring at or before `now`
    async fn find_products_with_due_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn reservation_counts(&self, product_id: Uuid) -> Result<ReservationCounts, StoreError>;

    /// Page through the catalog in id order
    async fn list_product_ids(&self, limit: i64, offset: i64) -> Result<Vec<Uuid>, StoreError>;
}

/// Number of reservations per status for one product
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationCounts {
    pub active: i64,
    pub confirmed: i64,
    pub released: i64,
    pub expired: i64,
}

impl ReservationCounts {
    pub fn add(&mut self, status: ReservationStatus, count: i64) {
        match status {
            ReservationStatus::Active => self.active += count,
            ReservationStatus::Confirmed => self.confirmed += count,
            ReservationStatus::Released => self.released += count,
            ReservationStatus::Expired => self.expired += count,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Rejected(#[from] StockError),
}

impl StoreError {
    /// The business error behind a rejected section, if that is what this is
    pub fn as_stock_error(&self) -> Option<&StockError> {
        match self {
            StoreError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}
