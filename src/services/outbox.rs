//! Cancellation outbox
//!
//! Side effects of a cancellation are stored as intents in the same batch as
//! the status change. The relay executes them, first inline right after the
//! commit and then from a polling worker that retries with backoff until an
//! entry succeeds or runs out of attempts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::aggregates::NotificationKind;
use crate::domain::events::DomainEvent;
use crate::gateway::{encode, DataGateway, Filter, GatewayError, GatewayExt, GatewayResult, Table, WriteBatch};
use crate::services::directory::AccountDirectory;
use crate::services::inventory::InventoryRestorer;
use crate::services::notifications::{Audience, CancellationNotice, NotificationEmitter};
use crate::services::orders::OrderRepository;
use crate::services::publisher::{EventPublisher, PublishError};
use crate::services::refunds::{LedgerError, RefundLedger};

/// A side effect owed by a committed cancellation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Refund { order_id: Uuid, amount: Decimal, reason: String, actor_id: Uuid },
    Restock { order_id: Uuid, item_id: Uuid, product_id: Uuid, quantity: u32 },
    /// Recipients and the actor's role are looked up when dispatched, so a failed lookup is retried.
    Notify { order_id: Uuid, audience: Audience, actor_id: Uuid, reason: String, refund: Option<Decimal> },
    Publish { event: DomainEvent },
}

impl Intent {
    /// Stable per order, so the same intent can never be staged twice.
    pub fn idempotency_key(&self, order_id: Uuid) -> String {
        match self {
            Intent::Refund { .. } => format!("{order_id}:refund"),
            Intent::Restock { item_id, .. } => format!("{order_id}:restock:{item_id}"),
            Intent::Notify { audience, .. } => format!("{order_id}:notify:{}", audience.as_str()),
            Intent::Publish { event } => format!("{order_id}:publish:{}", event.subject()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Intent::Refund { .. } => "refund",
            Intent::Restock { .. } => "restock",
            Intent::Notify { .. } => "notify",
            Intent::Publish { .. } => "publish",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus { #[default] Pending, Done, Dead }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seq: u32,
    pub intent: Intent,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub lease: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct OutboxPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// How long a claimed entry stays invisible to other dispatchers.
    pub lease: Duration,
    pub batch_size: usize,
    pub poll_interval: std::time::Duration,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::seconds(2),
            max_backoff: Duration::minutes(10),
            lease: Duration::seconds(30),
            batch_size: 50,
            poll_interval: std::time::Duration::from_secs(1),
        }
    }
}

impl OutboxPolicy {
    /// Exponential backoff for the given attempt number (1-based) with up to 50% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.num_milliseconds().saturating_mul(1i64 << attempt.saturating_sub(1).min(20));
        let capped = exp.min(self.max_backoff.num_milliseconds());
        let jitter = if capped > 1 { rand::thread_rng().gen_range(0..=capped / 2) } else { 0 };
        Duration::milliseconds(capped + jitter)
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    Done,
    Retrying { attempt: u32, next_attempt_at: DateTime<Utc> },
    Dead { attempts: u32 },
    /// Another dispatcher holds the entry, or took it over mid-dispatch.
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub done: usize,
    pub retrying: usize,
    pub dead: usize,
    pub skipped: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Done => self.done += 1,
            DispatchOutcome::Retrying { .. } => self.retrying += 1,
            DispatchOutcome::Dead { .. } => self.dead += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize { self.done + self.retrying + self.dead + self.skipped }
}

pub struct OutboxRelay {
    gateway: Arc<dyn DataGateway>,
    orders: OrderRepository,
    directory: Arc<AccountDirectory>,
    ledger: Arc<RefundLedger>,
    inventory: Arc<InventoryRestorer>,
    notifications: Arc<NotificationEmitter>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: OutboxPolicy,
}

impl OutboxRelay {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        directory: Arc<AccountDirectory>,
        ledger: Arc<RefundLedger>,
        inventory: Arc<InventoryRestorer>,
        notifications: Arc<NotificationEmitter>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: OutboxPolicy,
    ) -> Self {
        Self { orders: OrderRepository::new(gateway.clone()), gateway, directory, ledger, inventory, notifications, publisher, clock, policy }
    }

    /// Builds entries for `intents`, already leased to the caller that will dispatch them inline.
    pub fn stage(&self, order_id: Uuid, intents: Vec<Intent>) -> Vec<OutboxEntry> {
        let now = self.clock.now();
        intents
            .into_iter()
            .enumerate()
            .map(|(seq, intent)| OutboxEntry {
                id: Uuid::now_v7(),
                order_id,
                seq: seq as u32,
                idempotency_key: intent.idempotency_key(order_id),
                intent,
                status: OutboxStatus::Pending,
                attempts: 0,
                lease: 1,
                last_error: None,
                created_at: now,
                next_attempt_at: now + self.policy.lease,
                processed_at: None,
            })
            .collect()
    }

    pub async fn entries_for(&self, order_id: Uuid) -> GatewayResult<Vec<OutboxEntry>> {
        let mut entries: Vec<OutboxEntry> = self.gateway.fetch_all(Table::Outbox, &Filter::new().eq("order_id", order_id)).await?;
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// Runs the entry's side effect. `Ok(true)` means `done` was committed together with it.
    async fn execute(&self, entry: &OutboxEntry, done: WriteBatch) -> Result<bool, DispatchError> {
        match &entry.intent {
            Intent::Refund { order_id, amount, reason, actor_id } => {
                self.ledger.record_refund(*order_id, *amount, reason, *actor_id).await?;
            }
            Intent::Restock { product_id, quantity, .. } => {
                // A deleted product has nothing to restock; retrying would not help.
                return Ok(self.inventory.restore(*product_id, *quantity, done).await?);
            }
            Intent::Notify { order_id, audience, actor_id, reason, refund } => {
                self.notify_cancelled(&entry.idempotency_key, *order_id, *audience, *actor_id, reason, *refund).await?;
            }
            Intent::Publish { event } => self.publisher.publish(event).await?,
        }
        Ok(false)
    }

    async fn notify_cancelled(
        &self,
        key: &str,
        order_id: Uuid,
        audience: Audience,
        actor_id: Uuid,
        reason: &str,
        refund: Option<Decimal>,
    ) -> GatewayResult<()> {
        let Some(order) = self.orders.load(order_id).await? else {
            tracing::warn!(%order_id, "Cancelled order vanished, nobody to notify");
            return Ok(());
        };
        let recipients = match audience {
            Audience::Customer => vec![order.customer_id()],
            Audience::Supplier => self.directory.resolve_supplier(&order).await?.into_iter().collect(),
            Audience::Admin => self.directory.admin_recipients().await?,
        };
        if recipients.is_empty() {
            tracing::debug!(%order_id, audience = audience.as_str(), "No recipients");
            return Ok(());
        }
        let notice = CancellationNotice {
            order_id,
            reason,
            refund,
            cancelled_by: actor_id,
            cancelled_by_role: self.directory.resolve_role(actor_id).await?,
        };
        let message = notice.message(audience);
        for recipient in recipients {
            let recipient_key = format!("{key}:{recipient}");
            self.notifications
                .notify(&recipient_key, recipient, CancellationNotice::TITLE, &message, NotificationKind::OrderCancelled, notice.metadata())
                .await?;
        }
        Ok(())
    }

    /// Executes an entry the caller has leased and records the result.
    pub async fn dispatch(&self, entry: &OutboxEntry) -> DispatchOutcome {
        let held = Filter::by_id(entry.id).eq("lease", entry.lease).eq("status", OutboxStatus::Pending);
        let done = json!({ "status": OutboxStatus::Done, "processed_at": self.clock.now(), "last_error": null });
        let result = self.execute(entry, WriteBatch::new().update(Table::Outbox, held.clone(), done.clone())).await;
        let now = self.clock.now();
        let (patch, outcome) = match result {
            Ok(true) => {
                tracing::debug!(order_id = %entry.order_id, intent = entry.intent.label(), "Outbox entry done");
                return DispatchOutcome::Done;
            }
            Ok(false) => {
                tracing::debug!(order_id = %entry.order_id, intent = entry.intent.label(), "Outbox entry done");
                (done, DispatchOutcome::Done)
            }
            Err(DispatchError::Gateway(GatewayError::PreconditionFailed { table: Table::Outbox })) => {
                tracing::warn!(entry_id = %entry.id, lease = entry.lease, "Outbox entry taken over by another dispatcher");
                return DispatchOutcome::Skipped;
            }
            Err(e) => {
                let attempt = entry.attempts + 1;
                if attempt >= self.policy.max_attempts {
                    tracing::error!(order_id = %entry.order_id, intent = entry.intent.label(), attempt, error = %e, "Outbox entry abandoned");
                    (json!({ "status": OutboxStatus::Dead, "attempts": attempt, "last_error": e.to_string(), "processed_at": now }),
                     DispatchOutcome::Dead { attempts: attempt })
                } else {
                    let next_attempt_at = now + self.policy.backoff(attempt);
                    tracing::warn!(order_id = %entry.order_id, intent = entry.intent.label(), attempt, error = %e, "Outbox entry failed, will retry");
                    (json!({ "attempts": attempt, "last_error": e.to_string(), "next_attempt_at": next_attempt_at }),
                     DispatchOutcome::Retrying { attempt, next_attempt_at })
                }
            }
        };
        match self.gateway.update(Table::Outbox, &held, patch).await {
            Ok(rows) if rows.is_empty() => {
                tracing::warn!(entry_id = %entry.id, lease = entry.lease, "Outbox result not recorded, lease no longer held");
                DispatchOutcome::Skipped
            }
            Ok(_) => outcome,
            Err(e) => {
                tracing::error!(entry_id = %entry.id, error = %e, "Failed to record outbox result");
                outcome
            }
        }
    }

    /// Dispatches entries in order; each one is independent of the others.
    pub async fn dispatch_all(&self, entries: &[OutboxEntry]) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.dispatch(entry).await);
        }
        outcomes
    }

    async fn claim(&self, entry: &OutboxEntry, now: DateTime<Utc>) -> GatewayResult<Option<OutboxEntry>> {
        let filter = Filter::by_id(entry.id).eq("lease", entry.lease).eq("status", OutboxStatus::Pending);
        let patch = json!({ "lease": entry.lease + 1, "next_attempt_at": now + self.policy.lease });
        let claimed = self.gateway.update(Table::Outbox, &filter, patch).await?;
        Ok((!claimed.is_empty()).then(|| OutboxEntry { lease: entry.lease + 1, next_attempt_at: now + self.policy.lease, ..entry.clone() }))
    }

    pub async fn pending_due(&self, now: DateTime<Utc>) -> GatewayResult<Vec<OutboxEntry>> {
        let mut due: Vec<OutboxEntry> = self.gateway.fetch_all(Table::Outbox, &Filter::new().eq("status", OutboxStatus::Pending)).await?;
        due.retain(|e| e.next_attempt_at <= now);
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.order_id.cmp(&b.order_id)).then(a.seq.cmp(&b.seq)));
        due.truncate(self.policy.batch_size);
        Ok(due)
    }

    pub async fn drain_once(&self) -> GatewayResult<DrainReport> {
        let now = self.clock.now();
        let mut report = DrainReport::default();
        for entry in self.pending_due(now).await? {
            let outcome = match self.claim(&entry, now).await? {
                Some(claimed) => self.dispatch(&claimed).await,
                None => DispatchOutcome::Skipped,
            };
            report.record(&outcome);
        }
        if report.total() > 0 {
            tracing::info!(done = report.done, retrying = report.retrying, dead = report.dead, skipped = report.skipped, "Outbox drained");
        }
        Ok(report)
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.policy.poll_interval.as_millis() as u64, "Outbox relay started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once().await {
                        tracing::error!(error = %e, "Outbox drain failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() { break; }
                }
            }
        }
        tracing::info!("Outbox relay stopped");
    }
}

pub(crate) fn encode_entries(entries: &[OutboxEntry]) -> GatewayResult<Vec<Value>> {
    entries.iter().map(|e| encode(Table::Outbox, e)).collect()
}
