use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::events::DomainEvent;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// One entry of an order's timeline, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub event_version: i32,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn record<E: DomainEvent>(order_id: Uuid, event: &E) -> Result<Self, TimelineError> {
        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            event_type: E::event_type().to_string(),
            event_version: E::event_version(),
            payload: event.to_payload()?,
            occurred_at: Utc::now(),
        })
    }
}

/// Append-only log of what happened to an order
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderEventLog: Send + Sync {
    async fn append(&self, event: &OrderEvent) -> Result<(), TimelineError>;

    /// Events of one order, oldest first
    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<OrderEvent>, TimelineError>;
}

/// PostgreSQL implementation of OrderEventLog
pub struct PostgresOrderEventLog {
    pool: PgPool,
}

impl PostgresOrderEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderEventLog for PostgresOrderEventLog {
    async fn append(&self, event: &OrderEvent) -> Result<(), TimelineError> {
        sqlx::query(
            r#"
            INSERT INTO order_events (
                id, order_id, event_type, event_version, payload, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.order_id)
        .bind(&event.event_type)
        .bind(event.event_version)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            order_id = %event.order_id,
            event_type = %event.event_type,
            "Order event appended"
        );

        Ok(())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<OrderEvent>, TimelineError> {
        let events: Vec<OrderEvent> = sqlx::query_as(
            r#"
            SELECT id, order_id, event_type, event_version, payload, occurred_at
            FROM order_events
            WHERE order_id = $1
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::events::stock_events::ReservationsReleasedEvent;

    #[test]
    fn test_record_event() {
        let order_id = Uuid::new_v4();
        let event = ReservationsReleasedEvent {
            order_id,
            released: 2,
            reason: "Payment failed".to_string(),
            released_at: Utc::now(),
        };

        let recorded = OrderEvent::record(order_id, &event).unwrap();

        assert_eq!(recorded.order_id, order_id);
        assert_eq!(recorded.event_type, "ReservationsReleased");
        assert_eq!(recorded.event_version, 1);
        assert_eq!(recorded.payload["released"], 2);
    }
}
