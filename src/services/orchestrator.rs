//! Cancellation orchestrator
//!
//! Validates a cancellation, commits the status change together with the
//! side-effect intents, then dispatches those intents best-effort. The
//! cancellation stands no matter how the side effects fare.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::aggregates::{Order, OrderError, OrderStatus};
use crate::domain::value_objects::{Reason, ReasonError};
use crate::gateway::{DataGateway, Filter, GatewayError, Table, WriteBatch};
use crate::services::notifications::Audience;
use crate::services::orders::OrderRepository;
use crate::services::outbox::{encode_entries, DispatchOutcome, Intent, OutboxRelay};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CancellationError {
    #[error("Order {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Rejected(#[from] OrderError),

    #[error(transparent)]
    InvalidReason(#[from] ReasonError),

    #[error("Order {0} was changed by another request; reload and try again")]
    Conflict(Uuid),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct CancellationOrchestrator {
    gateway: Arc<dyn DataGateway>,
    orders: OrderRepository,
    relay: Arc<OutboxRelay>,
    clock: Arc<dyn Clock>,
}

impl CancellationOrchestrator {
    pub fn new(gateway: Arc<dyn DataGateway>, relay: Arc<OutboxRelay>, clock: Arc<dyn Clock>) -> Self {
        Self { orders: OrderRepository::new(gateway.clone()), gateway, relay, clock }
    }

    pub async fn load(&self, order_id: Uuid) -> Result<Order, CancellationError> {
        self.orders.load(order_id).await?.ok_or(CancellationError::NotFound(order_id))
    }

    #[tracing::instrument(skip_all, fields(%order_id, %actor_id))]
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str, actor_id: Uuid) -> Result<Order, CancellationError> {
        let mut order = self.load(order_id).await?;
        order.check_cancellable()?;
        let reason = Reason::new(reason)?;

        let now = self.clock.now();
        order.cancel(&reason, actor_id, now)?;
        let intents = Self::plan(&mut order, &reason, actor_id);
        let entries = self.relay.stage(order_id, intents);

        // Only a row still in PROCESSING may flip, so concurrent cancellations cannot both win.
        let mut batch = WriteBatch::new().update(
            Table::Orders,
            Filter::by_id(order_id).eq("status", OrderStatus::Processing),
            json!({
                "status": order.status(),
                "cancelled_at": order.cancelled_at(),
                "cancellation_reason": order.cancellation_reason(),
                "cancelled_by": order.cancelled_by(),
                "updated_at": now,
            }),
        );
        for row in encode_entries(&entries)? {
            batch = batch.insert(Table::Outbox, row);
        }
        match self.gateway.commit(batch).await {
            Ok(()) => {}
            Err(GatewayError::PreconditionFailed { table: Table::Orders }) => {
                tracing::warn!("Order changed before the cancellation committed");
                return Err(CancellationError::Conflict(order_id));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(intents = entries.len(), "Order cancelled");

        let outcomes = self.relay.dispatch_all(&entries).await;
        let failed = outcomes.iter().filter(|o| !matches!(o, DispatchOutcome::Done)).count();
        if failed > 0 {
            tracing::warn!(failed, "Some cancellation side effects deferred to the outbox worker");
        }
        Ok(order)
    }

    /// Side effects in execution order: refund, restocks, notifications, then events.
    fn plan(order: &mut Order, reason: &Reason, actor_id: Uuid) -> Vec<Intent> {
        let order_id = order.id();
        let refund = order.refund_due();
        let mut intents = Vec::new();

        if let Some(amount) = refund {
            intents.push(Intent::Refund { order_id, amount, reason: reason.as_str().to_string(), actor_id });
        }
        for item in order.items() {
            intents.push(Intent::Restock { order_id, item_id: item.id, product_id: item.product_id, quantity: item.quantity });
        }
        for audience in Audience::ALL {
            intents.push(Intent::Notify { order_id, audience, actor_id, reason: reason.as_str().to_string(), refund });
        }
        for event in order.take_events() {
            intents.push(Intent::Publish { event });
        }
        intents
    }
}
