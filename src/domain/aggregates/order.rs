//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Reason;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    customer_id: Uuid,
    status: OrderStatus,
    payment_status: PaymentStatus,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    cancelled_by: Option<Uuid>,
    #[serde(default, skip_serializing)]
    items: Vec<OrderItem>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem { pub id: Uuid, pub order_id: Uuid, pub position: u32, pub product_id: Uuid, pub supplier_id: Option<Uuid>, pub quantity: u32, pub unit_price: Decimal }

impl OrderItem {
    pub fn new(order_id: Uuid, product_id: Uuid, quantity: u32, unit_price: Decimal) -> Self {
        Self { id: Uuid::now_v7(), order_id, position: 0, product_id, supplier_id: None, quantity, unit_price }
    }
    pub fn line_total(&self) -> Decimal { self.unit_price * Decimal::from(self.quantity) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Completed, Failed, Refunded }

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending", Self::Processing => "processing", Self::Shipped => "shipped",
            Self::Delivered => "delivered", Self::Cancelled => "cancelled", Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

impl Order {
    pub fn create(customer_id: Uuid, payment_status: PaymentStatus, total_amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), customer_id, status: OrderStatus::Pending, payment_status, total_amount,
            created_at: now, updated_at: now, cancelled_at: None, cancellation_reason: None, cancelled_by: None,
            items: vec![], events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn customer_id(&self) -> Uuid { self.customer_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn total_amount(&self) -> Decimal { self.total_amount }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> { self.cancelled_at }
    pub fn cancellation_reason(&self) -> Option<&str> { self.cancellation_reason.as_deref() }
    pub fn cancelled_by(&self) -> Option<Uuid> { self.cancelled_by }

    pub fn add_item(&mut self, product_id: Uuid, quantity: u32, unit_price: Decimal) -> &mut OrderItem {
        let position = self.items.len();
        self.items.push(OrderItem { position: position as u32, ..OrderItem::new(self.id, product_id, quantity, unit_price) });
        self.touch();
        &mut self.items[position]
    }

    /// Attaches line items loaded separately from the order row.
    pub fn with_items(mut self, items: Vec<OrderItem>) -> Self { self.items = items; self }

    /// Amount owed back to the customer if this order is cancelled now.
    pub fn refund_due(&self) -> Option<Decimal> {
        (self.payment_status == PaymentStatus::Completed && self.total_amount > Decimal::ZERO).then_some(self.total_amount)
    }

    pub fn mark_processing(&mut self) -> Result<(), OrderError> {
        self.advance(OrderStatus::Pending, OrderStatus::Processing)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Processing { order_id: self.id }));
        Ok(())
    }

    pub fn ship(&mut self) -> Result<(), OrderError> {
        self.advance(OrderStatus::Processing, OrderStatus::Shipped)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Shipped { order_id: self.id }));
        Ok(())
    }

    pub fn deliver(&mut self) -> Result<(), OrderError> {
        self.advance(OrderStatus::Shipped, OrderStatus::Delivered)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Delivered { order_id: self.id }));
        Ok(())
    }

    /// Only orders being processed can be cancelled by this workflow.
    pub fn check_cancellable(&self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Processing => Ok(()),
            OrderStatus::Pending => Err(OrderError::AwaitingProcessing),
            s @ (OrderStatus::Shipped | OrderStatus::Delivered) => Err(OrderError::AdminRefundRequired(s)),
            s @ (OrderStatus::Cancelled | OrderStatus::Refunded) => Err(OrderError::AlreadyClosed(s)),
        }
    }

    pub fn cancel(&mut self, reason: &Reason, actor_id: Uuid, at: DateTime<Utc>) -> Result<(), OrderError> {
        self.check_cancellable()?;
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.cancellation_reason = Some(reason.as_str().to_string());
        self.cancelled_by = Some(actor_id);
        self.updated_at = at;
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled {
            order_id: self.id, customer_id: self.customer_id, reason: reason.as_str().to_string(),
            cancelled_by: actor_id, cancelled_at: at, refund_due: self.refund_due(),
        }));
        Ok(())
    }

    fn advance(&mut self, from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        if self.status != from { return Err(OrderError::InvalidTransition { from: self.status, to }); }
        self.status = to;
        self.touch();
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order is still pending; wait for processing before cancelling")]
    AwaitingProcessing,
    #[error("Order has already been {0}; contact an admin to request a refund")]
    AdminRefundRequired(OrderStatus),
    #[error("Order is already {0}")]
    AlreadyClosed(OrderStatus),
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing_order() -> Order {
        let mut order = Order::create(Uuid::now_v7(), PaymentStatus::Completed, Decimal::new(500, 0));
        order.add_item(Uuid::now_v7(), 3, Decimal::new(16666, 2));
        order.mark_processing().unwrap();
        order.take_events();
        order
    }

    #[test]
    fn test_order_workflow() {
        let mut order = processing_order();
        order.ship().unwrap();
        order.deliver().unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert_eq!(order.mark_processing(), Err(OrderError::InvalidTransition { from: OrderStatus::Delivered, to: OrderStatus::Processing }));
    }

    #[test]
    fn test_cancel_stamps_fields_and_raises_event() {
        let mut order = processing_order();
        let actor = Uuid::now_v7();
        let at = Utc::now();
        order.cancel(&Reason::new("customer request").unwrap(), actor, at).unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancelled_at(), Some(at));
        assert_eq!(order.cancellation_reason(), Some("customer request"));
        assert_eq!(order.cancelled_by(), Some(actor));
        let events = order.take_events();
        assert!(matches!(&events[..], [DomainEvent::Order(OrderEvent::Cancelled { refund_due: Some(d), .. })] if *d == Decimal::new(500, 0)));
    }

    #[test]
    fn test_cancel_rejections_by_status() {
        let pending = Order::create(Uuid::now_v7(), PaymentStatus::Pending, Decimal::ZERO);
        assert_eq!(pending.check_cancellable(), Err(OrderError::AwaitingProcessing));
        assert!(OrderError::AwaitingProcessing.to_string().contains("wait for processing"));

        let mut shipped = processing_order();
        shipped.ship().unwrap();
        let err = shipped.check_cancellable().unwrap_err();
        assert_eq!(err, OrderError::AdminRefundRequired(OrderStatus::Shipped));
        assert!(err.to_string().contains("contact an admin"));

        let mut cancelled = processing_order();
        cancelled.cancel(&Reason::new("x").unwrap(), Uuid::now_v7(), Utc::now()).unwrap();
        assert_eq!(cancelled.cancel(&Reason::new("again").unwrap(), Uuid::now_v7(), Utc::now()), Err(OrderError::AlreadyClosed(OrderStatus::Cancelled)));
    }

    #[test]
    fn test_refund_due_requires_completed_payment_and_positive_total() {
        assert_eq!(Order::create(Uuid::now_v7(), PaymentStatus::Completed, Decimal::new(500, 0)).refund_due(), Some(Decimal::new(500, 0)));
        assert_eq!(Order::create(Uuid::now_v7(), PaymentStatus::Pending, Decimal::new(500, 0)).refund_due(), None);
        assert_eq!(Order::create(Uuid::now_v7(), PaymentStatus::Completed, Decimal::ZERO).refund_due(), None);
    }

    #[test]
    fn test_items_not_serialized_with_order_row() {
        let order = processing_order();
        let row = serde_json::to_value(&order).unwrap();
        assert!(row.get("items").is_none());
        assert_eq!(row["status"], "PROCESSING");
    }
}
