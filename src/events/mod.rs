use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the core services. Emission is best-effort: a full or
/// closed channel never fails the operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    OrderRefunded(Uuid),

    // Coupon events
    CouponRedeemed {
        coupon_id: Uuid,
        user_id: Uuid,
        discount: i64,
    },

    // Delivery events
    CourierAssigned {
        order_id: Uuid,
        courier_id: Uuid,
    },
    CourierReassigned {
        order_id: Uuid,
        previous_courier_id: Uuid,
        courier_id: Uuid,
    },

    // Settlement events
    SettlementApplied(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Spawn this alongside the
/// services; it exits when every sender is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "event: order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    old_status = %old_status,
                    new_status = %new_status,
                    "event: order status changed"
                );
            }
            Event::OrderCancelled(order_id) => {
                info!(order_id = %order_id, "event: order cancelled");
            }
            Event::OrderRefunded(order_id) => {
                info!(order_id = %order_id, "event: order refunded");
            }
            Event::CouponRedeemed {
                coupon_id,
                user_id,
                discount,
            } => {
                info!(
                    coupon_id = %coupon_id,
                    user_id = %user_id,
                    discount = discount,
                    "event: coupon redeemed"
                );
            }
            Event::CourierAssigned {
                order_id,
                courier_id,
            } => {
                info!(order_id = %order_id, courier_id = %courier_id, "event: courier assigned");
            }
            Event::CourierReassigned {
                order_id,
                previous_courier_id,
                courier_id,
            } => {
                info!(
                    order_id = %order_id,
                    previous_courier_id = %previous_courier_id,
                    courier_id = %courier_id,
                    "event: courier reassigned"
                );
            }
            Event::SettlementApplied(order_id) => {
                info!(order_id = %order_id, "event: settlement applied");
            }
        }
        debug!(?event, "event processed");
    }
}
