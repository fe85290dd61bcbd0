use chrono::Utc;
use common::config::ReservationConfig;
use domain::events::stock_events::{
    ReservationsReleasedEvent, ReservedLine, StockConfirmedEvent, StockDebitedEvent,
    StockReservedEvent, StockRestoredEvent,
};
use domain::events::DomainEvent;
use domain::{merge_items, ReservationStatus, StockItem, StockReservation};
use std::collections::HashMap;
use std::sync::Arc;
use stock_engine::{
    BatchReport, StockAvailabilityService, StockReservationService, StockServiceError,
};
use stock_store::StockStore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{OrderFlowError, Result};
use crate::events::{
    OrderCancelledEvent, OrderCreatedEvent, OrderRefundedEvent, PaymentConfirmedEvent,
};
use crate::order::{OrderSnapshot, OrderStatus, StockMode};
use crate::timeline::{OrderEvent, OrderEventLog};

/// How stock was taken for a new order
#[derive(Debug, Clone, PartialEq)]
pub enum StockPlacement {
    Reserved(Vec<StockReservation>),
    Debited(BatchReport),
}

/// Drives stock through an order's lifecycle and records each step on the
/// order's timeline.
pub struct OrderStockCoordinator<S: StockStore, L: OrderEventLog> {
    availability: StockAvailabilityService<S>,
    reservations: StockReservationService<S>,
    timeline: Arc<L>,
}

impl<S: StockStore, L: OrderEventLog> OrderStockCoordinator<S, L> {
    pub fn new(store: Arc<S>, config: &ReservationConfig, timeline: Arc<L>) -> Self {
        Self {
            availability: StockAvailabilityService::new(store.clone()),
            reservations: StockReservationService::new(store, config),
            timeline,
        }
    }

    /// Reserve or debit the order's stock.
    ///
    /// In reserved mode a signed-in user's cart holds are moved to the order;
    /// otherwise the lines are held directly. In direct mode the units that
    /// were debited are kept on `order.debited`, also when the batch fails
    /// part way.
    pub async fn on_order_created(&self, order: &mut OrderSnapshot) -> Result<StockPlacement> {
        if order.status != OrderStatus::Pending {
            return Err(OrderFlowError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Pending,
            });
        }

        let items = order.items();
        let placement = match order.stock_mode {
            StockMode::Reserved => {
                let placed = match order.user_id {
                    Some(user_id) => {
                        self.reservations
                            .transfer_cart_reservations_to_order(user_id, order.order_id, &items)
                            .await?
                    }
                    None => {
                        self.reservations
                            .reserve_for_order(order.order_id, None, &items)
                            .await?
                    }
                };
                StockPlacement::Reserved(placed)
            }
            StockMode::Direct => match self.availability.debit_stock(&items).await {
                Ok(report) => {
                    order.debited = debited_items(&items, &report)?;
                    StockPlacement::Debited(report)
                }
                Err(StockServiceError::PartialFailure(report)) => {
                    order.debited = debited_items(&items, &report)?;
                    if !order.debited.is_empty() {
                        self.record(
                            order.order_id,
                            &StockDebitedEvent {
                                order_id: order.order_id,
                                items: order.debited.clone(),
                                debited_at: Utc::now(),
                            },
                        )
                        .await;
                    }
                    return Err(StockServiceError::PartialFailure(report).into());
                }
                Err(e) => return Err(e.into()),
            },
        };

        let now = Utc::now();
        self.record(
            order.order_id,
            &OrderCreatedEvent {
                order_id: order.order_id,
                user_id: order.user_id,
                lines: order.lines.clone(),
                stock_mode: order.stock_mode,
                total_amount: order.total_amount(),
                created_at: now,
            },
        )
        .await;

        match &placement {
            StockPlacement::Reserved(placed) => {
                self.record(
                    order.order_id,
                    &StockReservedEvent {
                        order_id: order.order_id,
                        lines: placed.iter().map(ReservedLine::from).collect(),
                        transferred_from_cart: order.user_id.is_some(),
                        reserved_at: now,
                    },
                )
                .await
            }
            StockPlacement::Debited(_) => {
                self.record(
                    order.order_id,
                    &StockDebitedEvent {
                        order_id: order.order_id,
                        items: order.debited.clone(),
                        debited_at: now,
                    },
                )
                .await
            }
        }

        info!(
            order_id = %order.order_id,
            stock_mode = ?order.stock_mode,
            "Order stock placed"
        );
        Ok(placement)
    }

    /// Make the order's holds permanent; returns how many were confirmed.
    ///
    /// The order stays pending unless its confirmed holds cover every line,
    /// e.g. when the expiry sweep got to them before payment did.
    pub async fn on_payment_confirmed(&self, order: &mut OrderSnapshot) -> Result<usize> {
        order.ensure_can_transition(OrderStatus::Paid)?;

        let confirmed = match order.stock_mode {
            StockMode::Reserved => {
                let confirmed = self.reservations.confirm_reservations(order.order_id).await?;
                let missing = uncovered_lines(&order.items(), &self.confirmed_for(order).await?);
                if !missing.is_empty() {
                    warn!(
                        order_id = %order.order_id,
                        missing = missing.len(),
                        "Payment arrived for stock the order no longer holds"
                    );
                    return Err(OrderFlowError::StockNotSecured {
                        order_id: order.order_id,
                        missing,
                    });
                }
                confirmed
            }
            StockMode::Direct => 0,
        };
        order.status = OrderStatus::Paid;

        let now = Utc::now();
        self.record(
            order.order_id,
            &PaymentConfirmedEvent {
                order_id: order.order_id,
                confirmed_at: now,
            },
        )
        .await;
        if confirmed > 0 {
            self.record(
                order.order_id,
                &StockConfirmedEvent {
                    order_id: order.order_id,
                    confirmed,
                    confirmed_at: now,
                },
            )
            .await;
        }

        info!(order_id = %order.order_id, confirmed, "Order paid");
        Ok(confirmed)
    }

    /// Release open holds and put back exactly what was permanently debited
    pub async fn on_order_cancelled(&self, order: &mut OrderSnapshot, reason: &str) -> Result<()> {
        order.ensure_can_transition(OrderStatus::Cancelled)?;

        let released = match order.stock_mode {
            StockMode::Reserved => self.reservations.release_reservations(order.order_id).await?,
            StockMode::Direct => 0,
        };
        let restored = self.restore_debited(order).await?;
        order.status = OrderStatus::Cancelled;

        let now = Utc::now();
        if released > 0 {
            self.record(
                order.order_id,
                &ReservationsReleasedEvent {
                    order_id: order.order_id,
                    released,
                    reason: reason.to_string(),
                    released_at: now,
                },
            )
            .await;
        }
        if !restored.is_empty() {
            self.record(
                order.order_id,
                &StockRestoredEvent {
                    order_id: order.order_id,
                    items: restored,
                    reason: reason.to_string(),
                    restored_at: now,
                },
            )
            .await;
        }
        self.record(
            order.order_id,
            &OrderCancelledEvent {
                order_id: order.order_id,
                reason: reason.to_string(),
                cancelled_at: now,
            },
        )
        .await;

        info!(order_id = %order.order_id, released, reason, "Order cancelled");
        Ok(())
    }

    /// Put back the stock of a paid order
    pub async fn on_order_refunded(&self, order: &mut OrderSnapshot) -> Result<()> {
        order.ensure_can_transition(OrderStatus::Refunded)?;

        let restored = self.restore_debited(order).await?;
        order.status = OrderStatus::Refunded;

        let now = Utc::now();
        if !restored.is_empty() {
            self.record(
                order.order_id,
                &StockRestoredEvent {
                    order_id: order.order_id,
                    items: restored,
                    reason: "Order refunded".to_string(),
                    restored_at: now,
                },
            )
            .await;
        }
        self.record(
            order.order_id,
            &OrderRefundedEvent {
                order_id: order.order_id,
                refunded_at: now,
            },
        )
        .await;

        info!(order_id = %order.order_id, "Order refunded");
        Ok(())
    }

    pub async fn order_timeline(&self, order_id: Uuid) -> Result<Vec<OrderEvent>> {
        Ok(self.timeline.list_for_order(order_id).await?)
    }

    /// Credit back the units this order permanently removed
    async fn restore_debited(&self, order: &mut OrderSnapshot) -> Result<Vec<StockItem>> {
        let items = match order.stock_mode {
            StockMode::Direct => order.debited.clone(),
            StockMode::Reserved => self.confirmed_for(order).await?,
        };

        if items.is_empty() {
            return Ok(items);
        }
        self.availability.credit_stock(&items).await?;
        order.debited.clear();
        Ok(items)
    }

    async fn confirmed_for(&self, order: &OrderSnapshot) -> Result<Vec<StockItem>> {
        let confirmed: Vec<StockReservation> = self
            .reservations
            .reservations_for_order(order.order_id)
            .await?
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .collect();
        Ok(confirmed_quantities(&confirmed))
    }

    /// Timeline writes never undo stock work
    async fn record<E: DomainEvent + Sync>(&self, order_id: Uuid, event: &E) {
        let result = match OrderEvent::record(order_id, event) {
            Ok(entry) => self.timeline.append(&entry).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(
                order_id = %order_id,
                event_type = E::event_type(),
                error = %e,
                "Failed to append order event"
            );
        }
    }
}

/// The merged order items that are not in the report's failures
fn debited_items(items: &[StockItem], report: &BatchReport) -> Result<Vec<StockItem>> {
    let merged = merge_items(items).map_err(StockServiceError::from)?;
    Ok(merged
        .into_iter()
        .filter(|item| !report.failures.iter().any(|f| f.key == item.product_id))
        .collect())
}

/// What each line still lacks after subtracting the confirmed quantities
fn uncovered_lines(lines: &[StockItem], confirmed: &[StockItem]) -> Vec<StockItem> {
    let mut needed: Vec<StockItem> = Vec::new();
    for line in lines {
        match needed.iter_mut().find(|n| n.product_id == line.product_id) {
            Some(n) => n.quantity += line.quantity,
            None => needed.push(*line),
        }
    }
    needed
        .into_iter()
        .filter_map(|item| {
            let held: i32 = confirmed
                .iter()
                .filter(|c| c.product_id == item.product_id)
                .map(|c| c.quantity)
                .sum();
            (held < item.quantity).then(|| StockItem::new(item.product_id, item.quantity - held))
        })
        .collect()
}

/// Confirmed quantities summed per product, first-seen order
fn confirmed_quantities(confirmed: &[StockReservation]) -> Vec<StockItem> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut totals: HashMap<Uuid, i32> = HashMap::new();
    for reservation in confirmed {
        let total = totals.entry(reservation.product_id).or_insert_with(|| {
            order.push(reservation.product_id);
            0
        });
        *total += reservation.quantity;
    }
    order
        .into_iter()
        .map(|product_id| StockItem::new(product_id, totals[&product_id]))
        .collect()
}
