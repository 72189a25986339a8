//! Seller earnings Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Running totals for one supplier. `version` guards concurrent writers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SellerEarnings {
    id: Uuid,
    supplier_id: Uuid,
    total_earnings: Decimal,
    total_refunds: Decimal,
    net_earnings: Decimal,
    pending_earnings: Decimal,
    paid_earnings: Decimal,
    version: i64,
    updated_at: DateTime<Utc>,
}

/// Append-only record of one earnings delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SellerEarningEntry {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub order_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind { Sale, RefundDeduction }

impl SellerEarnings {
    pub fn open(supplier_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), supplier_id, total_earnings: Decimal::ZERO, total_refunds: Decimal::ZERO,
            net_earnings: Decimal::ZERO, pending_earnings: Decimal::ZERO, paid_earnings: Decimal::ZERO,
            version: 0, updated_at: at,
        }
    }

    pub fn supplier_id(&self) -> Uuid { self.supplier_id }
    pub fn total_earnings(&self) -> Decimal { self.total_earnings }
    pub fn total_refunds(&self) -> Decimal { self.total_refunds }
    pub fn net_earnings(&self) -> Decimal { self.net_earnings }
    pub fn pending_earnings(&self) -> Decimal { self.pending_earnings }
    pub fn paid_earnings(&self) -> Decimal { self.paid_earnings }
    pub fn version(&self) -> i64 { self.version }

    /// Refunds come out of the unpaid balance first; the pending balance never goes negative.
    pub fn deduct_refund(&mut self, order_id: Uuid, amount: Decimal, at: DateTime<Utc>) -> SellerEarningEntry {
        self.total_refunds += amount;
        self.pending_earnings = (self.pending_earnings - amount).max(Decimal::ZERO);
        self.bump(at);
        self.entry(EntryKind::RefundDeduction, order_id, -amount, at)
    }

    fn bump(&mut self, at: DateTime<Utc>) {
        self.net_earnings = self.total_earnings - self.total_refunds;
        self.version += 1;
        self.updated_at = at;
    }

    fn entry(&self, kind: EntryKind, order_id: Uuid, amount: Decimal, at: DateTime<Utc>) -> SellerEarningEntry {
        SellerEarningEntry { id: Uuid::now_v7(), supplier_id: self.supplier_id, order_id, kind, amount, created_at: at }
    }
}
