pub mod stock_events;

use serde::{Deserialize, Serialize};

/// Trait for events recorded on an order's stock timeline
pub trait DomainEvent: Serialize + for<'de> Deserialize<'de> {
    /// Get the event type name
    fn event_type() -> &'static str;

    /// Get the event version
    fn event_version() -> i32 {
        1
    }

    /// Serialize the event body for storage
    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
