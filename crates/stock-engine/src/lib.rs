//! Stock services on top of a [`stock_store::StockStore`]: the direct-debit
//! availability path, the hold-based reservation path and the cache/ledger
//! sync sweeps.

pub mod availability;
mod cache;
pub mod errors;
pub mod reservation;
pub mod sync;

pub use availability::StockAvailabilityService;
pub use errors::{BatchReport, ItemFailure, StockServiceError};
pub use reservation::{ReservationStats, StockReservationService};
pub use sync::{CacheDrift, StockSyncService, SyncOutcome, SyncReport};
