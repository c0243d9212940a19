use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CouponKind {
    /// Flat amount off, in minor units, capped at the order total.
    #[sea_orm(string_value = "Fixed")]
    Fixed,
    /// Percentage off (0-100), truncated to whole minor units.
    #[sea_orm(string_value = "Percent")]
    Percent,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub code: String,

    pub kind: CouponKind,

    /// Fixed amount in minor units, or percent 0-100, depending on `kind`.
    pub value: i64,

    /// Minimum pre-discount order total (incl. tax and additional fees).
    pub min_order_price: i64,

    /// Uses left across all users. Decremented only inside the redemption
    /// transaction; never goes below zero.
    pub remaining_uses: i32,

    pub max_uses_per_user: i32,

    /// Validity window, inclusive on both ends, compared date-only.
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    CouponUsage,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CouponUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
