use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_status_history::{self, ActorRole, Entity as StatusHistory},
        vendor::Entity as Vendor,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::wallet,
};

/// Who performed a lifecycle action; recorded in the status history.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: ActorRole::System,
        }
    }
}

/// Governs the order state machine after pricing is finalized. Every
/// transition appends a history row in the same transaction; wallet
/// settlement rides the DELIVERED and REFUNDED transitions and is guarded so
/// it can never apply twice.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderLifecycleService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, actor), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = current.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatusTransition {
                from: old_status,
                to: new_status,
            });
        }
        if new_status == OrderStatus::OutForDelivery && current.courier_id.is_none() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has no courier assigned",
                order_id
            )));
        }

        match new_status {
            OrderStatus::Delivered => self.settle(&txn, &current, now).await?,
            OrderStatus::Refunded => self.refund(&txn, &current, now).await?,
            _ => {}
        }

        let mut active: order::ActiveModel = current.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(now));
        let version = *active.version.as_ref();
        active.version = Set(version + 1);
        if new_status == OrderStatus::Delivered {
            active.settled_at = Set(Some(now));
        }
        if new_status == OrderStatus::Refunded {
            active.refunded_at = Set(Some(now));
        }
        let updated = active.update(&txn).await?;

        append_history(&txn, order_id, new_status, actor, note, now).await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status,
            "order status updated"
        );

        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        })
        .await;
        match new_status {
            OrderStatus::Cancelled => self.emit(Event::OrderCancelled(order_id)).await,
            OrderStatus::Delivered => self.emit(Event::SettlementApplied(order_id)).await,
            OrderStatus::Refunded => self.emit(Event::OrderRefunded(order_id)).await,
            _ => {}
        }

        Ok(updated)
    }

    /// Cancellation wrapper; reachable from any non-terminal state.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        self.transition(order_id, OrderStatus::Cancelled, actor, reason)
            .await
    }

    /// Assigns a courier exactly once, from CONFIRMED onward. Re-assignment
    /// is a separate, explicitly modeled operation.
    #[instrument(skip(self, actor), fields(order_id = %order_id, courier_id = %courier_id))]
    pub async fn assign_courier(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        actor: Actor,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !current.status.accepts_courier_assignment() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} cannot take a courier in status {}",
                order_id, current.status
            )));
        }
        if current.courier_id.is_some() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} already has a courier; use reassignment",
                order_id
            )));
        }

        let status = current.status;
        let mut active: order::ActiveModel = current.into();
        active.courier_id = Set(Some(courier_id));
        active.updated_at = Set(Some(now));
        let version = *active.version.as_ref();
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        append_history(
            &txn,
            order_id,
            status,
            actor,
            Some(format!("courier {} assigned", courier_id)),
            now,
        )
        .await?;

        txn.commit().await?;
        info!(order_id = %order_id, courier_id = %courier_id, "courier assigned");
        self.emit(Event::CourierAssigned {
            order_id,
            courier_id,
        })
        .await;
        Ok(updated)
    }

    #[instrument(skip(self, actor), fields(order_id = %order_id, courier_id = %new_courier_id))]
    pub async fn reassign_courier(
        &self,
        order_id: Uuid,
        new_courier_id: Uuid,
        actor: Actor,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !current.status.accepts_courier_assignment() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} cannot take a courier in status {}",
                order_id, current.status
            )));
        }
        let Some(previous) = current.courier_id else {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has no courier to reassign",
                order_id
            )));
        };

        let status = current.status;
        let mut active: order::ActiveModel = current.into();
        active.courier_id = Set(Some(new_courier_id));
        active.updated_at = Set(Some(now));
        let version = *active.version.as_ref();
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        append_history(
            &txn,
            order_id,
            status,
            actor,
            Some(format!(
                "courier reassigned from {} to {}",
                previous, new_courier_id
            )),
            now,
        )
        .await?;

        txn.commit().await?;
        info!(
            order_id = %order_id,
            previous_courier = %previous,
            new_courier = %new_courier_id,
            "courier reassigned"
        );
        self.emit(Event::CourierReassigned {
            order_id,
            previous_courier_id: previous,
            courier_id: new_courier_id,
        })
        .await;
        Ok(updated)
    }

    pub async fn get_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(order.status)
    }

    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        StatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::RecordedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Moves the money for a delivered order: debit the customer, split the
    /// proceeds between vendor and courier. The `settled_at IS NULL` guard
    /// makes a duplicate attempt a hard failure instead of a double spend.
    async fn settle(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let guard = OrderEntity::update_many()
            .col_expr(order::Column::SettledAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::SettledAt.is_null())
            .exec(txn)
            .await?;
        if guard.rows_affected == 0 {
            return Err(ServiceError::SettlementAlreadyApplied(order.id));
        }

        let vendor = Vendor::find_by_id(order.vendor_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Vendor {} not found", order.vendor_id))
            })?;

        let (vendor_share, courier_share) = settlement_split(order);

        wallet::apply_debit(txn, order.customer_id, order.pay_price, now).await?;
        wallet::apply_credit(txn, vendor.owner_id, vendor_share, now).await?;
        if let Some(courier_id) = order.courier_id {
            wallet::apply_credit(txn, courier_id, courier_share, now).await?;
        }

        info!(
            order_id = %order.id,
            pay_price = order.pay_price,
            vendor_share = vendor_share,
            courier_share = courier_share,
            "settlement applied"
        );
        Ok(())
    }

    /// Reverses a completed settlement. Refunding an order that was never
    /// settled is an integrity fault.
    async fn refund(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if order.settled_at.is_none() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} was never settled; nothing to refund",
                order.id
            )));
        }

        let guard = OrderEntity::update_many()
            .col_expr(order::Column::RefundedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::RefundedAt.is_null())
            .exec(txn)
            .await?;
        if guard.rows_affected == 0 {
            return Err(ServiceError::SettlementAlreadyApplied(order.id));
        }

        let vendor = Vendor::find_by_id(order.vendor_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Vendor {} not found", order.vendor_id))
            })?;

        let (vendor_share, courier_share) = settlement_split(order);

        wallet::apply_debit(txn, vendor.owner_id, vendor_share, now).await?;
        if let Some(courier_id) = order.courier_id {
            wallet::apply_debit(txn, courier_id, courier_share, now).await?;
        }
        wallet::apply_credit(txn, order.customer_id, order.pay_price, now).await?;

        info!(order_id = %order.id, refund = order.pay_price, "settlement reversed");
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send lifecycle event");
            }
        }
    }
}

/// Vendor takes the payable amount minus the courier fee; the courier takes
/// the courier fee. With no courier assigned the fee stays with the vendor.
fn settlement_split(order: &order::Model) -> (i64, i64) {
    if order.courier_id.is_some() {
        (order.pay_price - order.courier_fee, order.courier_fee)
    } else {
        (order.pay_price, 0)
    }
}

async fn append_history(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    status: OrderStatus,
    actor: Actor,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        actor_id: Set(actor.id),
        actor_role: Set(actor.role),
        note: Set(note),
        recorded_at: Set(now),
    }
    .insert(txn)
    .await?;
    Ok(())
}
