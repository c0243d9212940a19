//! Food-delivery marketplace backend core: order pricing, coupon redemption,
//! and the order status lifecycle.
//!
//! The correctness-sensitive path is coupon redemption: eligibility checks
//! and usage consumption happen inside one transaction
//! ([`services::redemption`]), so concurrent checkouts can never over-redeem
//! a coupon. Pricing arithmetic is pure and the advisory validator is
//! read-only.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;

use events::{Event, EventSender};
use services::{
    checkout::CheckoutService, coupons::CouponService, lifecycle::OrderLifecycleService,
    redemption::RedemptionService, wallet::WalletService,
};

/// All core services wired over a shared connection pool and event channel.
#[derive(Clone)]
pub struct AppServices {
    pub coupons: CouponService,
    pub redemption: RedemptionService,
    pub checkout: CheckoutService,
    pub lifecycle: OrderLifecycleService,
    pub wallet: WalletService,
}

impl AppServices {
    /// Builds the service graph. The returned receiver should be handed to
    /// [`events::process_events`] (or a custom consumer).
    pub fn build(
        db: Arc<DatabaseConnection>,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = events::channel(event_buffer);
        let services = Self::with_sender(db, Some(Arc::new(sender)));
        (services, receiver)
    }

    /// Wires services against an existing sender, or none (events dropped).
    pub fn with_sender(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            coupons: CouponService::new(db.clone()),
            redemption: RedemptionService::new(db.clone(), event_sender.clone()),
            checkout: CheckoutService::new(db.clone(), event_sender.clone()),
            lifecycle: OrderLifecycleService::new(db.clone(), event_sender),
            wallet: WalletService::new(db),
        }
    }
}
