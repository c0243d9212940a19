use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Reasons a coupon may be refused before any state is touched.
///
/// These are expected business outcomes, not faults: they are returned to the
/// caller as typed rejections and must never be logged at error level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CouponRejection {
    #[error("coupon not found")]
    NotFound,

    /// The validity window has not opened yet. Rendered externally the same
    /// as `Expired` ("coupon is not active"); kept distinct for diagnostics.
    #[error("coupon is not active")]
    NotYetStarted,

    #[error("coupon is not active")]
    Expired,

    #[error("order total {total} is below the coupon minimum of {required}")]
    BelowMinimumPrice { required: i64, total: i64 },

    #[error("coupon has no remaining uses")]
    GloballyExhausted,

    #[error("per-user usage limit reached")]
    UserLimitReached,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A coupon failed one of the eligibility checks. Expected outcome.
    #[error("Coupon rejected: {0}")]
    CouponRejected(#[from] CouponRejection),

    /// Lost a race against another concurrent redemption after the internal
    /// retry. Transient; the client may retry the whole checkout.
    #[error("Redemption conflict: coupon {0} was consumed concurrently")]
    RedemptionConflict(Uuid),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// Settlement was already applied for this order. Indicates a data
    /// integrity fault; the operation is aborted without partial mutation.
    #[error("Settlement already applied for order {0}")]
    SettlementAlreadyApplied(Uuid),

    #[error("Insufficient funds: wallet {user_id} holds {balance}, needs {required}")]
    InsufficientFunds {
        user_id: Uuid,
        balance: i64,
        required: i64,
    },

    #[error("Event error: {0}")]
    EventError(String),
}

impl ServiceError {
    /// True for the typed business outcomes the caller should treat as a
    /// normal negative answer rather than a fault.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            ServiceError::CouponRejected(_) | ServiceError::RedemptionConflict(_)
        )
    }
}
