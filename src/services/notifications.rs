//! Notification emitter and recipient inbox

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::aggregates::{Notification, NotificationKind};
use crate::domain::value_objects::Role;
use crate::gateway::{encode, DataGateway, Filter, GatewayError, GatewayExt, GatewayResult, Table};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience { Customer, Supplier, Admin }

impl Audience {
    pub const ALL: [Audience; 3] = [Audience::Customer, Audience::Supplier, Audience::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Customer => "customer",
            Audience::Supplier => "supplier",
            Audience::Admin => "admin",
        }
    }
}

/// What every recipient of one cancellation is told.
#[derive(Clone, Debug)]
pub struct CancellationNotice<'a> {
    pub order_id: Uuid,
    pub reason: &'a str,
    pub refund: Option<Decimal>,
    pub cancelled_by: Uuid,
    pub cancelled_by_role: Option<Role>,
}

impl CancellationNotice<'_> {
    pub const TITLE: &'static str = "Order cancelled";

    pub fn message(&self, audience: Audience) -> String {
        let (order_id, reason) = (self.order_id, self.reason);
        match audience {
            Audience::Customer => {
                let refund_note = self.refund.map(|a| format!(" A refund of {a} has been requested.")).unwrap_or_default();
                format!("Your order {order_id} was cancelled: {reason}.{refund_note}")
            }
            Audience::Supplier => format!(
                "Order {order_id} containing your products was cancelled: {reason}. Its stock has been returned to inventory."
            ),
            Audience::Admin => {
                let by = self.cancelled_by_role.map_or_else(|| "an unknown account".to_string(), |r| format!("a {r}"));
                format!("Order {order_id} was cancelled by {by}: {reason}.")
            }
        }
    }

    pub fn metadata(&self) -> Value {
        json!({
            "order_id": self.order_id,
            "reason": self.reason,
            "refund_amount": self.refund,
            "cancelled_by": self.cancelled_by,
            "cancelled_by_role": self.cancelled_by_role,
        })
    }
}

pub struct NotificationEmitter {
    gateway: Arc<dyn DataGateway>,
    clock: Arc<dyn Clock>,
}

impl NotificationEmitter {
    pub fn new(gateway: Arc<dyn DataGateway>, clock: Arc<dyn Clock>) -> Self { Self { gateway, clock } }

    /// Stores one notification per `key`. `Ok(None)` means an earlier call already stored it.
    pub async fn notify(
        &self,
        key: &str,
        recipient_id: Uuid,
        title: &str,
        message: &str,
        kind: NotificationKind,
        metadata: Value,
    ) -> GatewayResult<Option<Notification>> {
        let notification = Notification::new(recipient_id, title, message, kind, metadata, self.clock.now()).keyed(key);
        match self.gateway.insert(Table::Notifications, encode(Table::Notifications, &notification)?).await {
            Ok(_) => {
                tracing::debug!(%recipient_id, kind = ?kind, "Notification stored");
                Ok(Some(notification))
            }
            Err(GatewayError::Conflict { table: Table::Notifications }) => {
                tracing::debug!(%recipient_id, key, "Notification already delivered");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Newest first.
    pub async fn list_for(&self, recipient_id: Uuid, unread_only: bool) -> GatewayResult<Vec<Notification>> {
        let mut filter = Filter::new().eq("recipient_id", recipient_id);
        if unread_only { filter = filter.eq("read", false); }
        let mut rows: Vec<Notification> = self.gateway.fetch_all(Table::Notifications, &filter).await?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    /// Returns `false` when no such notification exists.
    pub async fn mark_read(&self, id: Uuid) -> GatewayResult<bool> {
        let updated = self.gateway.update(Table::Notifications, &Filter::by_id(id), json!({ "read": true })).await?;
        Ok(!updated.is_empty())
    }
}
