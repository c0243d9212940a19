use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        menu_item::{self, Entity as MenuItem},
        order::{self, Entity as OrderEntity, OrderStatus},
        order_line,
        order_status_history::{self, ActorRole},
        vendor::{self, Entity as Vendor},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        pricing::{self, FeeSchedule, LineAmount},
        redemption,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    #[validate(length(min = 1, message = "Cart must contain at least one line"))]
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
}

/// Converts a cart into a priced, persisted order. Coupon consumption and
/// order creation share one transaction, so a crash can never leave a
/// consumed coupon without its order or vice versa.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(
        skip(self, request),
        fields(customer_id = %request.customer_id, vendor_id = %request.vendor_id)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<order::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        for line in &request.lines {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for item {} must be at least 1",
                    line.item_id
                )));
            }
        }

        let vendor = Vendor::find_by_id(request.vendor_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Vendor {} not found", request.vendor_id))
            })?;
        if !vendor.is_open {
            return Err(ServiceError::InvalidOperation(format!(
                "Vendor {} is not accepting orders",
                vendor.name
            )));
        }

        let priced_lines = self.snapshot_lines(&vendor, &request.lines).await?;
        let fees = FeeSchedule::from(&vendor);

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        // Pre-discount total drives both coupon eligibility and the discount.
        let undiscounted = pricing::assemble(&line_amounts(&priced_lines), fees, None);

        let redeemed = match &request.coupon_code {
            Some(code) => Some(
                redemption::redeem_in_txn(
                    &txn,
                    code,
                    request.customer_id,
                    undiscounted.pre_discount_total(),
                    now,
                )
                .await?,
            ),
            None => None,
        };

        let breakdown = pricing::assemble(
            &line_amounts(&priced_lines),
            fees,
            redeemed.as_ref().map(|r| &r.coupon),
        );

        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(request.customer_id),
            vendor_id: Set(request.vendor_id),
            coupon_id: Set(redeemed.as_ref().map(|r| r.coupon.id)),
            courier_id: Set(None),
            status: Set(OrderStatus::Created),
            raw_price: Set(breakdown.raw_price),
            tax_fee: Set(breakdown.tax_fee),
            additional_fee: Set(breakdown.additional_fee),
            courier_fee: Set(breakdown.courier_fee),
            discount: Set(breakdown.discount),
            pay_price: Set(breakdown.pay_price),
            settled_at: Set(None),
            refunded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for (item, quantity) in &priced_lines {
            order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                item_id: Set(item.id),
                item_name: Set(item.name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(*quantity),
            }
            .insert(&txn)
            .await?;
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Created),
            actor_id: Set(request.customer_id),
            actor_role: Set(ActorRole::Customer),
            note: Set(None),
            recorded_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            pay_price = breakdown.pay_price,
            discount = breakdown.discount,
            "order created at checkout"
        );

        self.emit(Event::OrderCreated(order_id)).await;
        if let Some(redeemed) = &redeemed {
            self.emit(Event::CouponRedeemed {
                coupon_id: redeemed.coupon.id,
                user_id: request.customer_id,
                discount: redeemed.discount,
            })
            .await;
        }

        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    pub async fn order_lines(&self, order_id: Uuid) -> Result<Vec<order_line::Model>, ServiceError> {
        order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::ItemName)
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Resolves cart lines against the vendor's current catalog, rejecting
    /// unknown, foreign, or unavailable items. Prices are frozen here.
    async fn snapshot_lines(
        &self,
        vendor: &vendor::Model,
        lines: &[CheckoutLine],
    ) -> Result<Vec<(menu_item::Model, i32)>, ServiceError> {
        let item_ids: Vec<Uuid> = lines.iter().map(|l| l.item_id).collect();
        let items: HashMap<Uuid, menu_item::Model> = MenuItem::find()
            .filter(menu_item::Column::Id.is_in(item_ids))
            .filter(menu_item::Column::VendorId.eq(vendor.id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let item = items.get(&line.item_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Item {} not found on vendor {}",
                    line.item_id, vendor.id
                ))
            })?;
            if !item.is_available {
                return Err(ServiceError::InvalidOperation(format!(
                    "Item {} is currently unavailable",
                    item.name
                )));
            }
            priced.push((item.clone(), line.quantity));
        }
        Ok(priced)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send checkout event");
            }
        }
    }
}

fn line_amounts(priced: &[(menu_item::Model, i32)]) -> Vec<LineAmount> {
    priced
        .iter()
        .map(|(item, quantity)| LineAmount {
            unit_price: item.unit_price,
            quantity: *quantity,
        })
        .collect()
}
