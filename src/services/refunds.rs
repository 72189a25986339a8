//! Refund ledger
//!
//! Records the refund owed on a cancelled order and deducts it from the
//! supplier's earnings. The return row, the earnings entry and the updated
//! earnings totals are written in one batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::aggregates::{RefundRequest, ReturnRecord, SellerEarnings};
use crate::gateway::{encode, DataGateway, Filter, GatewayError, GatewayExt, Table, WriteBatch};
use crate::services::directory::AccountDirectory;
use crate::services::orders::OrderRepository;
use crate::services::publisher::EventPublisher;

const MAX_EARNINGS_RETRIES: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Refund amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Seller earnings for {0} kept changing; giving up")]
    EarningsContention(Uuid),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct RefundLedger {
    gateway: Arc<dyn DataGateway>,
    orders: OrderRepository,
    directory: Arc<AccountDirectory>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl RefundLedger {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        directory: Arc<AccountDirectory>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { orders: OrderRepository::new(gateway.clone()), gateway, directory, publisher, clock }
    }

    pub async fn refund_for(&self, order_id: Uuid) -> Result<Option<ReturnRecord>, LedgerError> {
        Ok(self.gateway.fetch_optional(Table::Returns, &Filter::new().eq("order_id", order_id)).await?)
    }

    pub async fn record_refund(&self, order_id: Uuid, amount: Decimal, reason: &str, actor_id: Uuid) -> Result<ReturnRecord, LedgerError> {
        if let Some(existing) = self.refund_for(order_id).await? {
            tracing::info!(%order_id, return_id = %existing.id(), "Refund already recorded");
            return Ok(existing);
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let order = self.orders.load(order_id).await?.ok_or(LedgerError::OrderNotFound(order_id))?;
        let supplier_id = self.directory.resolve_supplier(&order).await?;
        let now = self.clock.now();
        let mut record = ReturnRecord::request(RefundRequest {
            order_id, customer_id: order.customer_id(), supplier_id, amount, reason: reason.to_string(), requested_by: actor_id,
        }, now);

        for _ in 0..MAX_EARNINGS_RETRIES {
            let mut batch = WriteBatch::new().insert(Table::Returns, encode(Table::Returns, &record)?);
            if let Some(supplier_id) = supplier_id {
                batch = self.stage_deduction(batch, supplier_id, order_id, amount, now).await?;
            }
            match self.gateway.commit(batch).await {
                Ok(()) => {
                    tracing::info!(%order_id, return_id = %record.id(), %amount, supplier_id = ?supplier_id, "Refund recorded");
                    for event in record.take_events() {
                        if let Err(e) = self.publisher.publish(&event).await {
                            tracing::warn!(%order_id, error = %e, "Failed to publish refund event");
                        }
                    }
                    return Ok(record);
                }
                Err(GatewayError::Conflict { table: Table::Returns }) => {
                    // Lost the race to a concurrent writer; its record stands.
                    return self.refund_for(order_id).await?.ok_or(LedgerError::Gateway(GatewayError::Conflict { table: Table::Returns }));
                }
                Err(GatewayError::PreconditionFailed { table: Table::SellerEarnings } | GatewayError::Conflict { table: Table::SellerEarnings }) => {
                    tracing::debug!(%order_id, "Seller earnings changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LedgerError::EarningsContention(supplier_id.unwrap_or_default()))
    }

    async fn stage_deduction(
        &self,
        batch: WriteBatch,
        supplier_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<WriteBatch, LedgerError> {
        let by_supplier = Filter::new().eq("supplier_id", supplier_id);
        let current: Option<SellerEarnings> = self.gateway.fetch_optional(Table::SellerEarnings, &by_supplier).await?;
        let (batch, entry) = match current {
            Some(mut earnings) => {
                let expected = by_supplier.eq("version", earnings.version());
                let entry = earnings.deduct_refund(order_id, amount, at);
                (batch.update(Table::SellerEarnings, expected, encode(Table::SellerEarnings, &earnings)?), entry)
            }
            None => {
                let mut earnings = SellerEarnings::open(supplier_id, at);
                let entry = earnings.deduct_refund(order_id, amount, at);
                (batch.insert(Table::SellerEarnings, encode(Table::SellerEarnings, &earnings)?), entry)
            }
        };
        Ok(batch.insert(Table::SellerEarningEntries, encode(Table::SellerEarningEntries, &entry)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::aggregates::{Order, PaymentStatus, Product, ReturnStatus};
    use crate::gateway::{InMemoryGateway, Op};
    use crate::services::publisher::RecordingPublisher;
    use chrono::Duration;

    struct Fixture {
        gw: InMemoryGateway,
        ledger: RefundLedger,
        publisher: Arc<RecordingPublisher>,
        supplier: Uuid,
    }

    async fn fixture() -> (Fixture, Order) {
        let gw = InMemoryGateway::new();
        let shared: Arc<dyn DataGateway> = Arc::new(gw.clone());
        let clock = Arc::new(ManualClock::default());
        let directory = Arc::new(AccountDirectory::new(shared.clone(), clock.clone(), Duration::minutes(5)));
        let publisher = Arc::new(RecordingPublisher::default());
        let ledger = RefundLedger::new(shared.clone(), directory, publisher.clone(), clock);

        let supplier = Uuid::now_v7();
        let product = Product::create("Blender", 1, Some(supplier));
        gw.insert(Table::Products, encode(Table::Products, &product).unwrap()).await.unwrap();
        let mut order = Order::create(Uuid::now_v7(), PaymentStatus::Completed, Decimal::new(500, 0));
        order.add_item(product.id(), 1, Decimal::new(500, 0));
        OrderRepository::new(shared).insert(&order).await.unwrap();
        (Fixture { gw, ledger, publisher, supplier }, order)
    }

    #[tokio::test]
    async fn test_records_refund_and_deducts_earnings() {
        let (f, order) = fixture().await;
        let record = f.ledger.record_refund(order.id(), Decimal::new(500, 0), "customer request", order.customer_id()).await.unwrap();
        assert_eq!(record.status(), ReturnStatus::Pending);
        assert_eq!(record.requested_amount(), Decimal::new(500, 0));
        assert_eq!(record.supplier_id(), Some(f.supplier));

        let earnings: SellerEarnings = f.gw.fetch_optional(Table::SellerEarnings, &Filter::new().eq("supplier_id", f.supplier)).await.unwrap().unwrap();
        assert_eq!(earnings.total_refunds(), Decimal::new(500, 0));
        assert_eq!(f.gw.rows(Table::SellerEarningEntries).len(), 1);
        assert_eq!(f.publisher.events().len(), 1);
    }

    #[tokio::test]
    async fn test_second_call_returns_existing_record() {
        let (f, order) = fixture().await;
        let first = f.ledger.record_refund(order.id(), Decimal::new(500, 0), "customer request", order.customer_id()).await.unwrap();
        let second = f.ledger.record_refund(order.id(), Decimal::new(500, 0), "again", order.customer_id()).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(f.gw.rows(Table::Returns).len(), 1);
        assert_eq!(f.gw.rows(Table::SellerEarningEntries).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_record_once() {
        let (f, order) = fixture().await;
        let (a, b) = tokio::join!(
            f.ledger.record_refund(order.id(), Decimal::new(500, 0), "one", order.customer_id()),
            f.ledger.record_refund(order.id(), Decimal::new(500, 0), "two", order.customer_id()),
        );
        assert_eq!(a.unwrap().id(), b.unwrap().id());
        assert_eq!(f.gw.rows(Table::Returns).len(), 1);
        let earnings: SellerEarnings = f.gw.fetch_optional(Table::SellerEarnings, &Filter::new()).await.unwrap().unwrap();
        assert_eq!(earnings.total_refunds(), Decimal::new(500, 0));
    }

    #[tokio::test]
    async fn test_failed_earnings_write_leaves_no_return_row() {
        let (f, order) = fixture().await;
        f.gw.fail_on(Table::SellerEarningEntries, Op::Insert);
        assert!(f.ledger.record_refund(order.id(), Decimal::new(500, 0), "x", order.customer_id()).await.is_err());
        assert!(f.gw.rows(Table::Returns).is_empty());
        assert!(f.gw.rows(Table::SellerEarnings).is_empty());
    }

    #[tokio::test]
    async fn test_supplier_lookup_error_records_nothing() {
        let (f, order) = fixture().await;
        f.gw.fail_on(Table::Products, Op::Select);
        let err = f.ledger.record_refund(order.id(), Decimal::new(500, 0), "x", order.customer_id()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Gateway(GatewayError::Storage(_))));
        assert!(f.gw.rows(Table::Returns).is_empty());

        f.gw.clear_failures();
        let record = f.ledger.record_refund(order.id(), Decimal::new(500, 0), "x", order.customer_id()).await.unwrap();
        assert_eq!(record.supplier_id(), Some(f.supplier));
        assert_eq!(f.gw.rows(Table::SellerEarningEntries).len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unknown_order_and_bad_amount() {
        let (f, _) = fixture().await;
        let missing = Uuid::now_v7();
        assert_eq!(f.ledger.record_refund(missing, Decimal::ONE, "x", missing).await.unwrap_err(), LedgerError::OrderNotFound(missing));
        assert_eq!(f.ledger.record_refund(missing, Decimal::ZERO, "x", missing).await.unwrap_err(), LedgerError::InvalidAmount(Decimal::ZERO));
    }
}
