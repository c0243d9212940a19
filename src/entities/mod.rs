pub mod coupon;
pub mod coupon_usage;
pub mod menu_item;
pub mod order;
pub mod order_line;
pub mod order_status_history;
pub mod vendor;
pub mod wallet;
