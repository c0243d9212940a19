use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Closed order state machine. Forward-only, except for the explicit
/// cancellation and refund branches.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderStatus {
    #[sea_orm(string_value = "Created")]
    Created,
    #[sea_orm(string_value = "Confirmed")]
    Confirmed,
    #[sea_orm(string_value = "Preparing")]
    Preparing,
    #[sea_orm(string_value = "ReadyForPickup")]
    ReadyForPickup,
    #[sea_orm(string_value = "OutForDelivery")]
    OutForDelivery,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
    #[sea_orm(string_value = "Refunded")]
    Refunded,
}

impl OrderStatus {
    /// Whether a transition to `next` is allowed. The match is exhaustive on
    /// the source state so adding a status forces this table to be revisited.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Created => matches!(next, Confirmed | Cancelled),
            Confirmed => matches!(next, Preparing | Cancelled),
            Preparing => matches!(next, ReadyForPickup | Cancelled),
            ReadyForPickup => matches!(next, OutForDelivery | Cancelled),
            OutForDelivery => matches!(next, Delivered | Cancelled),
            Delivered => matches!(next, Refunded),
            Cancelled => matches!(next, Refunded),
            Refunded => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Refunded)
    }

    /// Courier assignment is only meaningful once the vendor has confirmed
    /// and before the order reaches a terminal or cancelled state.
    pub fn accepts_courier_assignment(self) -> bool {
        use OrderStatus::*;
        matches!(self, Confirmed | Preparing | ReadyForPickup | OutForDelivery)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub coupon_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,

    pub status: OrderStatus,

    /// Price breakdown, snapshotted at checkout. All minor units, all >= 0.
    pub raw_price: i64,
    pub tax_fee: i64,
    pub additional_fee: i64,
    pub courier_fee: i64,
    pub discount: i64,
    pub pay_price: i64,

    /// Set exactly once, when wallet settlement is applied at delivery.
    pub settled_at: Option<DateTime<Utc>>,
    /// Set exactly once, when a settled order is refunded.
    pub refunded_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLine,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
    #[sea_orm(
        belongs_to = "super::vendor::Entity",
        from = "Column::VendorId",
        to = "super::vendor::Column::Id"
    )]
    Vendor,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLine.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::vendor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vendor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn happy_path_is_forward_only() {
        let path = [
            Created,
            Confirmed,
            Preparing,
            ReadyForPickup,
            OutForDelivery,
            Delivered,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
            assert!(!pair[1].can_transition_to(pair[0]));
        }
    }

    #[test]
    fn cancel_reachable_from_any_non_terminal_state() {
        for status in [Created, Confirmed, Preparing, ReadyForPickup, OutForDelivery] {
            assert!(status.can_transition_to(Cancelled));
        }
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Refunded.can_transition_to(Cancelled));
    }

    #[test]
    fn refund_only_after_delivery_or_cancellation() {
        assert!(Delivered.can_transition_to(Refunded));
        assert!(Cancelled.can_transition_to(Refunded));
        for status in [Created, Confirmed, Preparing, ReadyForPickup, OutForDelivery] {
            assert!(!status.can_transition_to(Refunded));
        }
    }

    #[test]
    fn refunded_is_terminal() {
        for status in [
            Created,
            Confirmed,
            Preparing,
            ReadyForPickup,
            OutForDelivery,
            Delivered,
            Cancelled,
            Refunded,
        ] {
            assert!(!Refunded.can_transition_to(status));
        }
    }
}
