//! Domain events
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Refund(RefundEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Processing { order_id: Uuid },
    Shipped { order_id: Uuid },
    Delivered { order_id: Uuid },
    Cancelled { order_id: Uuid, customer_id: Uuid, reason: String, cancelled_by: Uuid, cancelled_at: DateTime<Utc>, refund_due: Option<Decimal> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RefundEvent {
    Requested { return_id: Uuid, order_id: Uuid, amount: Decimal },
}

impl DomainEvent {
    /// Subject suffix used when publishing, e.g. `orders.cancelled`.
    pub fn subject(&self) -> String {
        match self {
            DomainEvent::Order(e) => format!("orders.{}", match e {
                OrderEvent::Processing { .. } => "processing",
                OrderEvent::Shipped { .. } => "shipped",
                OrderEvent::Delivered { .. } => "delivered",
                OrderEvent::Cancelled { .. } => "cancelled",
            }),
            DomainEvent::Refund(e) => format!("refunds.{}", match e {
                RefundEvent::Requested { .. } => "requested",
            }),
        }
    }
}
