//! Return/Refund Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::events::{DomainEvent, RefundEvent};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnRecord {
    id: Uuid,
    order_id: Uuid,
    customer_id: Uuid,
    supplier_id: Option<Uuid>,
    requested_amount: Decimal,
    approved_amount: Option<Decimal>,
    reason: String,
    requested_by: Uuid,
    status: ReturnStatus,
    review_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus { #[default] Pending, Approved, Rejected, Completed }

/// Fields of a new refund request.
#[derive(Clone, Debug)]
pub struct RefundRequest {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub amount: Decimal,
    pub reason: String,
    pub requested_by: Uuid,
}

impl ReturnRecord {
    pub fn request(req: RefundRequest, at: DateTime<Utc>) -> Self {
        let id = Uuid::now_v7();
        let mut record = Self {
            id, order_id: req.order_id, customer_id: req.customer_id, supplier_id: req.supplier_id,
            requested_amount: req.amount, approved_amount: None, reason: req.reason, requested_by: req.requested_by,
            status: ReturnStatus::Pending, review_note: None, created_at: at, updated_at: at, completed_at: None,
            events: vec![],
        };
        record.raise_event(DomainEvent::Refund(RefundEvent::Requested { return_id: id, order_id: req.order_id, amount: req.amount }));
        record
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn customer_id(&self) -> Uuid { self.customer_id }
    pub fn supplier_id(&self) -> Option<Uuid> { self.supplier_id }
    pub fn requested_amount(&self) -> Decimal { self.requested_amount }
    pub fn status(&self) -> ReturnStatus { self.status }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> ReturnRecord {
        ReturnRecord::request(RefundRequest {
            order_id: Uuid::now_v7(), customer_id: Uuid::now_v7(), supplier_id: None,
            amount: Decimal::new(500, 0), reason: "customer request".into(), requested_by: Uuid::now_v7(),
        }, Utc::now())
    }

    #[test]
    fn test_request_is_pending_and_raises_event() {
        let mut r = pending();
        assert_eq!(r.status(), ReturnStatus::Pending);
        assert_eq!(r.requested_amount(), Decimal::new(500, 0));
        let events = r.take_events();
        assert!(matches!(events.as_slice(), [DomainEvent::Refund(RefundEvent::Requested { .. })]));
        assert!(r.take_events().is_empty());
    }
}
