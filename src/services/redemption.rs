//! Coupon usage ledger and the atomic redemption path.
//!
//! All coupon consumption funnels through [`try_consume`]: a conditional
//! decrement on `remaining_uses` guarded by `remaining_uses > 0`, plus a
//! usage insert under the (coupon, user, ordinal) primary key. Either both
//! writes commit or neither does, so the advisory validation in
//! `CouponService` can stay lock-free.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        coupon::{self, Entity as Coupon},
        coupon_usage::{self, Entity as CouponUsage},
    },
    errors::{CouponRejection, ServiceError},
    events::{Event, EventSender},
    services::{coupons, pricing},
};

/// Successful redemption: the consumed coupon and the discount it grants
/// against the total it was validated for.
#[derive(Debug, Clone)]
pub struct Redeemed {
    pub coupon: coupon::Model,
    pub discount: i64,
}

/// Number of ledger rows for a (coupon, user) pair.
pub async fn count_usages<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    user_id: Uuid,
) -> Result<u64, ServiceError> {
    CouponUsage::find()
        .filter(coupon_usage::Column::CouponId.eq(coupon_id))
        .filter(coupon_usage::Column::UserId.eq(user_id))
        .count(conn)
        .await
        .map_err(ServiceError::from)
}

/// Consumes one use of a coupon for a user, as a single unit of work on the
/// caller's transaction.
///
/// Re-checks the per-user cap, then decrements `remaining_uses` with a
/// conditional update so two racing callers cannot both take the last use,
/// then appends the ledger row. An ordinal collision (same user racing
/// itself) surfaces as `RedemptionConflict`.
pub async fn try_consume(
    txn: &DatabaseTransaction,
    coupon: &coupon::Model,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let prior_uses = count_usages(txn, coupon.id, user_id).await?;
    if prior_uses >= coupon.max_uses_per_user as u64 {
        return Err(CouponRejection::UserLimitReached.into());
    }

    let decremented = Coupon::update_many()
        .col_expr(
            coupon::Column::RemainingUses,
            Expr::col(coupon::Column::RemainingUses).sub(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
        .filter(coupon::Column::Id.eq(coupon.id))
        .filter(coupon::Column::RemainingUses.gt(0))
        .exec(txn)
        .await?;

    if decremented.rows_affected == 0 {
        debug!(coupon_id = %coupon.id, "no remaining uses at consumption time");
        return Err(CouponRejection::GloballyExhausted.into());
    }

    let usage = coupon_usage::ActiveModel {
        coupon_id: Set(coupon.id),
        user_id: Set(user_id),
        ordinal: Set(prior_uses as i32 + 1),
        used_at: Set(now),
    };

    match usage.insert(txn).await {
        Ok(_) => Ok(()),
        Err(err) => match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                // Another redemption by the same user claimed this ordinal
                // between our count and insert.
                Err(ServiceError::RedemptionConflict(coupon.id))
            }
            _ => Err(ServiceError::DatabaseError(err)),
        },
    }
}

/// Validates and consumes a coupon on the caller's transaction, so order
/// persistence and coupon consumption commit together. The eligibility
/// checks run against the same snapshot the consumption writes to.
pub async fn redeem_in_txn(
    txn: &DatabaseTransaction,
    code: &str,
    user_id: Uuid,
    pre_discount_total: i64,
    now: DateTime<Utc>,
) -> Result<Redeemed, ServiceError> {
    let coupon = Coupon::find()
        .filter(coupon::Column::Code.eq(code))
        .one(txn)
        .await?
        .ok_or(CouponRejection::NotFound)?;

    let prior_uses = count_usages(txn, coupon.id, user_id).await?;
    if let Some(rejection) =
        coupons::check_eligibility(&coupon, pre_discount_total, prior_uses, now.date_naive())
    {
        return Err(rejection.into());
    }

    try_consume(txn, &coupon, user_id, now).await?;

    let discount = pricing::discount_for(coupon.kind, coupon.value, pre_discount_total);
    Ok(Redeemed { coupon, discount })
}

#[derive(Clone)]
pub struct RedemptionService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl RedemptionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// The checkout-time redemption operation: one transaction covering
    /// validation and consumption, with a single internal retry when a
    /// concurrent redemption wins the ordinal race.
    #[instrument(skip(self), fields(code = %code, user_id = %user_id))]
    pub async fn redeem(
        &self,
        code: &str,
        user_id: Uuid,
        pre_discount_total: i64,
    ) -> Result<Redeemed, ServiceError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let txn = self.db.begin().await?;
            match redeem_in_txn(&txn, code, user_id, pre_discount_total, Utc::now()).await {
                Ok(redeemed) => {
                    txn.commit().await?;
                    info!(
                        coupon_id = %redeemed.coupon.id,
                        user_id = %user_id,
                        discount = redeemed.discount,
                        "coupon redeemed"
                    );
                    self.emit(Event::CouponRedeemed {
                        coupon_id: redeemed.coupon.id,
                        user_id,
                        discount: redeemed.discount,
                    })
                    .await;
                    return Ok(redeemed);
                }
                Err(ServiceError::RedemptionConflict(coupon_id)) if attempts == 1 => {
                    txn.rollback().await?;
                    warn!(coupon_id = %coupon_id, "redemption conflict, retrying once");
                }
                Err(err) => {
                    txn.rollback().await?;
                    return Err(err);
                }
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send redemption event");
            }
        }
    }
}
