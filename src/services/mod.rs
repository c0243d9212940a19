pub mod checkout;
pub mod coupons;
pub mod lifecycle;
pub mod pricing;
pub mod redemption;
pub mod wallet;
