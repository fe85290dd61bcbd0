use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::StockError;

/// Hold lifetime used when the caller does not pick one
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 30;

/// Lifecycle of a reservation. Every state but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(StockError::InvalidRequest(format!(
                "unknown reservation status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationType {
    Cart,
    Order,
}

impl ReservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationType::Cart => "cart",
            ReservationType::Order => "order",
        }
    }
}

impl fmt::Display for ReservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cart" => Ok(ReservationType::Cart),
            "order" => Ok(ReservationType::Order),
            other => Err(StockError::InvalidRequest(format!(
                "unknown reservation type '{}'",
                other
            ))),
        }
    }
}

/// Who a cart hold belongs to: a signed-in user or an anonymous session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartOwner {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
}

impl CartOwner {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            session_id: None,
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            session_id: Some(session_id.into()),
        }
    }

    /// User identity wins over the session when both are set.
    pub fn owns(&self, reservation: &StockReservation) -> bool {
        if reservation.reservation_type != ReservationType::Cart {
            return false;
        }
        match (&self.user_id, &self.session_id) {
            (Some(user_id), _) => reservation.user_id == Some(*user_id),
            (None, Some(session_id)) => reservation.session_id.as_deref() == Some(session_id),
            (None, None) => false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.session_id.is_none()
    }
}

/// A time-boxed hold on stock for a cart or an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub reservation_type: ReservationType,
    pub status: ReservationStatus,
    pub order_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockReservation {
    pub fn for_order(
        product_id: Uuid,
        quantity: i32,
        order_id: Uuid,
        user_id: Option<Uuid>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            reservation_type: ReservationType::Order,
            status: ReservationStatus::Active,
            order_id: Some(order_id),
            user_id,
            session_id: None,
            expires_at: now + ttl,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_cart(product_id: Uuid, quantity: i32, owner: &CartOwner, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            reservation_type: ReservationType::Cart,
            status: ReservationStatus::Active,
            order_id: None,
            user_id: owner.user_id,
            session_id: owner.session_id.clone(),
            expires_at: now + ttl,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Checks the shape of a new hold before it is placed
    pub fn validate(&self) -> Result<(), StockError> {
        if self.quantity <= 0 {
            return Err(StockError::InvalidRequest(format!(
                "reservation quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.status != ReservationStatus::Active {
            return Err(StockError::InvalidRequest(format!(
                "new reservation must be active, got {}",
                self.status
            )));
        }
        match self.reservation_type {
            ReservationType::Order if self.order_id.is_none() => Err(StockError::InvalidRequest(
                "order reservation requires an order id".to_string(),
            )),
            ReservationType::Cart if self.user_id.is_none() && self.session_id.is_none() => {
                Err(StockError::InvalidRequest(
                    "cart reservation requires a user or session id".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Active but past its expiry time, waiting for the sweep
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }

    pub fn belongs_to_order(&self, order_id: Uuid) -> bool {
        self.reservation_type == ReservationType::Order && self.order_id == Some(order_id)
    }

    fn transition(&mut self, to: ReservationStatus, now: DateTime<Utc>) -> Result<(), StockError> {
        if self.status.is_terminal() {
            return Err(StockError::InvalidRequest(format!(
                "reservation {} is already {}",
                self.id, self.status
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), StockError> {
        self.transition(ReservationStatus::Confirmed, now)
    }

    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), StockError> {
        self.transition(ReservationStatus::Released, now)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), StockError> {
        self.transition(ReservationStatus::Expired, now)
    }

    pub fn extend(&mut self, by: Duration, now: DateTime<Utc>) -> Result<(), StockError> {
        if !self.is_active() {
            return Err(StockError::InvalidRequest(format!(
                "reservation {} is {} and cannot be extended",
                self.id, self.status
            )));
        }
        self.expires_at = self.expires_at + by;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_hold(quantity: i32) -> StockReservation {
        StockReservation::for_order(
            Uuid::new_v4(),
            quantity,
            Uuid::new_v4(),
            None,
            Duration::minutes(DEFAULT_RESERVATION_TTL_MINUTES),
        )
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert!("pending".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_quantity() {
        assert!(order_hold(0).validate().is_err());
        assert!(order_hold(-2).validate().is_err());
        assert!(order_hold(1).validate().is_ok());
    }

    #[test]
    fn test_cart_hold_requires_owner() {
        let hold = StockReservation::for_cart(
            Uuid::new_v4(),
            1,
            &CartOwner { user_id: None, session_id: None },
            Duration::minutes(5),
        );
        assert!(hold.validate().is_err());

        let hold = StockReservation::for_cart(
            Uuid::new_v4(),
            1,
            &CartOwner::session("sess-1"),
            Duration::minutes(5),
        );
        assert!(hold.validate().is_ok());
    }

    #[test]
    fn test_transitions_happen_once() {
        let now = Utc::now();
        let mut hold = order_hold(2);

        hold.confirm(now).unwrap();
        assert_eq!(hold.status, ReservationStatus::Confirmed);

        assert!(hold.release(now).is_err());
        assert!(hold.expire(now).is_err());
        assert_eq!(hold.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn test_extend_only_active() {
        let now = Utc::now();
        let mut hold = order_hold(1);
        let before = hold.expires_at;

        hold.extend(Duration::minutes(10), now).unwrap();
        assert_eq!(hold.expires_at, before + Duration::minutes(10));

        hold.release(now).unwrap();
        assert!(hold.extend(Duration::minutes(10), now).is_err());
    }

    #[test]
    fn test_cart_owner_matching() {
        let user_id = Uuid::new_v4();
        let owner = CartOwner::user(user_id);
        let hold = StockReservation::for_cart(Uuid::new_v4(), 1, &owner, Duration::minutes(5));

        assert!(owner.owns(&hold));
        assert!(!CartOwner::user(Uuid::new_v4()).owns(&hold));
        assert!(!owner.owns(&order_hold(1)));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let hold = order_hold(1).with_expiry(now - Duration::seconds(1));
        assert!(hold.is_due(now));

        let hold = order_hold(1);
        assert!(!hold.is_due(now));
    }
}
