//! Pure price-assembly arithmetic. No I/O, no locking; all amounts are
//! non-negative integer minor units.

use serde::{Deserialize, Serialize};

use crate::entities::coupon::{self, CouponKind};

/// One cart line reduced to the numbers pricing needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmount {
    pub unit_price: i64,
    pub quantity: i32,
}

/// Per-vendor flat fees applied to every order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub tax_fee: i64,
    pub additional_fee: i64,
    pub courier_fee: i64,
}

impl From<&crate::entities::vendor::Model> for FeeSchedule {
    fn from(vendor: &crate::entities::vendor::Model) -> Self {
        Self {
            tax_fee: vendor.tax_fee,
            additional_fee: vendor.additional_fee,
            courier_fee: vendor.courier_fee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub raw_price: i64,
    pub tax_fee: i64,
    pub additional_fee: i64,
    pub courier_fee: i64,
    pub discount: i64,
    pub pay_price: i64,
}

impl PriceBreakdown {
    /// The amount coupon eligibility and discounts are evaluated against:
    /// items plus tax and additional fees, excluding the courier fee.
    pub fn pre_discount_total(&self) -> i64 {
        self.raw_price + self.tax_fee + self.additional_fee
    }
}

/// Discount for a coupon against a pre-discount total.
///
/// Fixed coupons never discount more than the total; percent coupons
/// truncate (integer division), they do not round.
pub fn discount_for(kind: CouponKind, value: i64, total: i64) -> i64 {
    match kind {
        CouponKind::Fixed => value.min(total).max(0),
        CouponKind::Percent => value.clamp(0, 100) * total / 100,
    }
}

/// Sum of line totals at their snapshotted unit prices.
pub fn raw_price(lines: &[LineAmount]) -> i64 {
    lines
        .iter()
        .map(|line| line.unit_price * i64::from(line.quantity))
        .sum()
}

/// Assembles the full breakdown. A supplied coupon is assumed to have passed
/// validation against the same pre-discount total; feeding an unvalidated
/// coupon is a caller contract violation, not a condition detected here.
pub fn assemble(
    lines: &[LineAmount],
    fees: FeeSchedule,
    coupon: Option<&coupon::Model>,
) -> PriceBreakdown {
    let raw = raw_price(lines);
    let pre_discount = raw + fees.tax_fee + fees.additional_fee;

    let discount = coupon
        .map(|c| discount_for(c.kind, c.value, pre_discount))
        .unwrap_or(0);

    // Discount never applies to the courier fee.
    let pay_price = (pre_discount + fees.courier_fee - discount).max(0);

    PriceBreakdown {
        raw_price: raw,
        tax_fee: fees.tax_fee,
        additional_fee: fees.additional_fee,
        courier_fee: fees.courier_fee,
        discount,
        pay_price,
    }
}
