use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon::{self, CouponKind, Entity as Coupon},
        coupon_usage::{self, Entity as CouponUsage},
    },
    errors::{CouponRejection, ServiceError},
    services::{pricing, redemption},
};

/// Outcome of the advisory eligibility check. A rejection here is a normal
/// business answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CouponDecision {
    Eligible(coupon::Model),
    Rejected(CouponRejection),
}

/// Response shape for the "can I apply this code" preview surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponPreview {
    pub valid: bool,
    pub discount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CouponRejection>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, max = 32, message = "Coupon code must be 1-32 characters"))]
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
    pub min_order_price: i64,
    pub global_uses: i32,
    pub max_uses_per_user: i32,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateCouponRequest {
    pub value: Option<i64>,
    pub min_order_price: Option<i64>,
    pub remaining_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
}

/// Runs the ordered eligibility checks, short-circuiting on the first
/// failure. Pure; `prior_uses` is the caller-supplied usage count for the
/// (coupon, user) pair.
pub fn check_eligibility(
    coupon: &coupon::Model,
    pre_discount_total: i64,
    prior_uses: u64,
    today: NaiveDate,
) -> Option<CouponRejection> {
    if today < coupon.starts_on {
        return Some(CouponRejection::NotYetStarted);
    }
    if today > coupon.ends_on {
        return Some(CouponRejection::Expired);
    }
    if pre_discount_total < coupon.min_order_price {
        return Some(CouponRejection::BelowMinimumPrice {
            required: coupon.min_order_price,
            total: pre_discount_total,
        });
    }
    if coupon.remaining_uses <= 0 {
        return Some(CouponRejection::GloballyExhausted);
    }
    if prior_uses >= coupon.max_uses_per_user as u64 {
        return Some(CouponRejection::UserLimitReached);
    }
    None
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Read-only eligibility decision for a coupon code against an order
    /// total. Performs no mutation and holds no locks; it is sufficient for
    /// preview but not for final redemption, which must re-validate inside
    /// the redemption transaction.
    #[instrument(skip(self), fields(code = %code, user_id = %user_id))]
    pub async fn validate(
        &self,
        code: &str,
        pre_discount_total: i64,
        user_id: Uuid,
        today: NaiveDate,
    ) -> Result<CouponDecision, ServiceError> {
        let Some(coupon) = self.find_by_code(code).await? else {
            debug!(code = %code, "coupon code not found");
            return Ok(CouponDecision::Rejected(CouponRejection::NotFound));
        };

        let prior_uses = redemption::count_usages(&*self.db, coupon.id, user_id).await?;

        match check_eligibility(&coupon, pre_discount_total, prior_uses, today) {
            Some(rejection) => {
                debug!(code = %code, rejection = %rejection, "coupon rejected");
                Ok(CouponDecision::Rejected(rejection))
            }
            None => Ok(CouponDecision::Eligible(coupon)),
        }
    }

    /// The `previewCoupon` surface: eligibility plus the discount the coupon
    /// would yield, without consuming anything.
    #[instrument(skip(self), fields(code = %code, user_id = %user_id))]
    pub async fn preview(
        &self,
        code: &str,
        pre_discount_total: i64,
        user_id: Uuid,
    ) -> Result<CouponPreview, ServiceError> {
        let today = Utc::now().date_naive();
        match self
            .validate(code, pre_discount_total, user_id, today)
            .await?
        {
            CouponDecision::Eligible(coupon) => Ok(CouponPreview {
                valid: true,
                discount: pricing::discount_for(coupon.kind, coupon.value, pre_discount_total),
                reason: None,
            }),
            CouponDecision::Rejected(reason) => Ok(CouponPreview {
                valid: false,
                discount: 0,
                reason: Some(reason),
            }),
        }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_coupon(
        &self,
        request: CreateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if request.value <= 0 {
            return Err(ServiceError::ValidationError(
                "Coupon value must be positive".to_string(),
            ));
        }
        if request.kind == CouponKind::Percent && request.value > 100 {
            return Err(ServiceError::ValidationError(
                "Percent coupons cannot exceed 100".to_string(),
            ));
        }
        if request.min_order_price < 0 || request.global_uses < 0 || request.max_uses_per_user < 1 {
            return Err(ServiceError::ValidationError(
                "Coupon limits must be non-negative and allow at least one use per user"
                    .to_string(),
            ));
        }
        if request.starts_on > request.ends_on {
            return Err(ServiceError::ValidationError(
                "Coupon start date must not be after its end date".to_string(),
            ));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(request.code),
            kind: Set(request.kind),
            value: Set(request.value),
            min_order_price: Set(request.min_order_price),
            remaining_uses: Set(request.global_uses),
            max_uses_per_user: Set(request.max_uses_per_user),
            starts_on: Set(request.starts_on),
            ends_on: Set(request.ends_on),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await?;
        info!(coupon_id = %created.id, code = %created.code, "coupon created");
        Ok(created)
    }

    #[instrument(skip(self, request), fields(coupon_id = %coupon_id))]
    pub async fn update_coupon(
        &self,
        coupon_id: Uuid,
        request: UpdateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        let coupon = Coupon::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let starts_on = request.starts_on.unwrap_or(coupon.starts_on);
        let ends_on = request.ends_on.unwrap_or(coupon.ends_on);
        if starts_on > ends_on {
            return Err(ServiceError::ValidationError(
                "Coupon start date must not be after its end date".to_string(),
            ));
        }
        if let Some(value) = request.value {
            if value <= 0 {
                return Err(ServiceError::ValidationError(
                    "Coupon value must be positive".to_string(),
                ));
            }
        }

        let mut active: coupon::ActiveModel = coupon.into();
        if let Some(value) = request.value {
            active.value = Set(value);
        }
        if let Some(min) = request.min_order_price {
            active.min_order_price = Set(min);
        }
        if let Some(remaining) = request.remaining_uses {
            active.remaining_uses = Set(remaining.max(0));
        }
        if let Some(per_user) = request.max_uses_per_user {
            active.max_uses_per_user = Set(per_user.max(1));
        }
        active.starts_on = Set(starts_on);
        active.ends_on = Set(ends_on);
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!(coupon_id = %coupon_id, "coupon updated");
        Ok(updated)
    }

    /// Deletes a coupon and cascades its usage ledger rows in one
    /// transaction.
    #[instrument(skip(self), fields(coupon_id = %coupon_id))]
    pub async fn delete_coupon(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let deleted = Coupon::delete_by_id(coupon_id).exec(&txn).await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Coupon {} not found",
                coupon_id
            )));
        }

        CouponUsage::delete_many()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(coupon_id = %coupon_id, "coupon deleted with usage ledger");
        Ok(())
    }

    pub async fn get_coupon(&self, coupon_id: Uuid) -> Result<Option<coupon::Model>, ServiceError> {
        Coupon::find_by_id(coupon_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<coupon::Model>, ServiceError> {
        Coupon::find()
            .order_by_asc(coupon::Column::Code)
            .paginate(&*self.db, per_page.max(1))
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::from)
    }
}
