//! Notification Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One row per recipient; customer, supplier and admin copies are independent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub metadata: Value,
    /// Set by retried senders; at most one row exists per key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind { OrderCancelled, RefundRequested, RefundUpdated, StockRestored, System }

impl Notification {
    pub fn new(recipient_id: Uuid, title: impl Into<String>, message: impl Into<String>, kind: NotificationKind, metadata: Value, at: DateTime<Utc>) -> Self {
        Self { id: Uuid::now_v7(), recipient_id, title: title.into(), message: message.into(), kind, read: false, metadata, idempotency_key: None, created_at: at }
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
