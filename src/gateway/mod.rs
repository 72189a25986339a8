//! Data access gateway
//!
//! Table-scoped reads and writes against the relational store. Rows travel as
//! JSON objects so the gateway stays ignorant of the domain types layered on top.

mod memory;
mod postgres;

pub use memory::{InMemoryGateway, Op};
pub use postgres::PgGateway;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub type Row = Value;

/// Tables the workflow touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Orders,
    OrderItems,
    Products,
    Returns,
    Notifications,
    SellerEarnings,
    SellerEarningEntries,
    Outbox,
    Customers,
    Suppliers,
    Admins,
    SuperAdmins,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Orders => "orders",
            Table::OrderItems => "order_items",
            Table::Products => "products",
            Table::Returns => "returns",
            Table::Notifications => "notifications",
            Table::SellerEarnings => "seller_earnings",
            Table::SellerEarningEntries => "seller_earning_entries",
            Table::Outbox => "cancellation_outbox",
            Table::Customers => "customers",
            Table::Suppliers => "suppliers",
            Table::Admins => "admins",
            Table::SuperAdmins => "super_admins",
        }
    }

    /// Column sets that must stay unique, mirrored by the SQL migrations.
    pub fn unique_keys(self) -> &'static [&'static [&'static str]] {
        match self {
            Table::Returns => &[&["id"], &["order_id"]],
            Table::SellerEarnings => &[&["id"], &["supplier_id"]],
            Table::SellerEarningEntries => &[&["id"], &["order_id", "kind"]],
            Table::Outbox => &[&["id"], &["idempotency_key"]],
            Table::Notifications => &[&["id"], &["idempotency_key"]],
            _ => &[&["id"]],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// Conjunction of column equality predicates. An empty filter matches every row.
///
/// A value that fails to serialize poisons the filter: it matches nothing and
/// every gateway call given it returns [`GatewayError::InvalidFilter`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    columns: Map<String, Value>,
    invalid: Option<(String, String)>,
}

impl Filter {
    pub fn new() -> Self { Self::default() }

    pub fn by_id(id: impl Serialize) -> Self { Self::new().eq("id", id) }

    pub fn eq(mut self, column: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => { self.columns.insert(column.to_string(), value); }
            Err(e) => {
                if self.invalid.is_none() { self.invalid = Some((column.to_string(), e.to_string())); }
            }
        }
        self
    }

    pub fn check(&self) -> GatewayResult<()> {
        match &self.invalid {
            Some((column, reason)) => Err(GatewayError::InvalidFilter { column: column.clone(), reason: reason.clone() }),
            None => Ok(()),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> { self.columns.iter() }

    pub fn matches(&self, row: &Row) -> bool {
        self.invalid.is_none()
            && self.columns.iter().all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
    }

    pub fn as_json(&self) -> Value { Value::Object(self.columns.clone()) }
}

/// One write inside an atomic batch.
#[derive(Clone, Debug)]
pub enum WriteOp {
    Insert { table: Table, row: Row },
    /// Fails the whole batch with [`GatewayError::PreconditionFailed`] when no row matches.
    Update { table: Table, filter: Filter, patch: Row },
}

/// Writes applied all-or-nothing.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self { Self::default() }

    pub fn insert(mut self, table: Table, row: Row) -> Self {
        self.ops.push(WriteOp::Insert { table, row });
        self
    }

    pub fn update(mut self, table: Table, filter: Filter, patch: Row) -> Self {
        self.ops.push(WriteOp::Update { table, filter, patch });
        self
    }

    /// Appends the writes of `other` after this batch's own.
    pub fn append(mut self, other: WriteBatch) -> Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[WriteOp] { &self.ops }

    pub fn len(&self) -> usize { self.ops.len() }

    pub fn is_empty(&self) -> bool { self.ops.is_empty() }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Unique constraint violated on {table}")]
    Conflict { table: Table },

    #[error("Conditional update on {table} matched no rows")]
    PreconditionFailed { table: Table },

    #[error("Malformed row in {table}: {reason}")]
    Decode { table: Table, reason: String },

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Filter value for {column} could not be encoded: {reason}")]
    InvalidFilter { column: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self { GatewayError::Storage(e.to_string()) }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Table-scoped access to the relational store.
#[async_trait]
pub trait DataGateway: Send + Sync + 'static {
    async fn select(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Row>>;

    async fn insert(&self, table: Table, row: Row) -> GatewayResult<Row>;

    /// Merges `patch` into every matching row and returns the updated rows.
    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> GatewayResult<Vec<Row>>;

    async fn delete(&self, table: Table, filter: &Filter) -> GatewayResult<u64>;

    async fn commit(&self, batch: WriteBatch) -> GatewayResult<()>;
}

/// Typed helpers over the raw row interface.
#[async_trait]
pub trait GatewayExt: DataGateway {
    async fn fetch_all<T: DeserializeOwned + Send>(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<T>> {
        self.select(table, filter).await?.into_iter().map(|row| decode(table, row)).collect()
    }

    async fn fetch_optional<T: DeserializeOwned + Send>(&self, table: Table, filter: &Filter) -> GatewayResult<Option<T>> {
        match self.select(table, filter).await?.into_iter().next() {
            Some(row) => decode(table, row).map(Some),
            None => Ok(None),
        }
    }
}

impl<G: DataGateway + ?Sized> GatewayExt for G {}

pub fn encode<T: Serialize>(table: Table, value: &T) -> GatewayResult<Row> {
    serde_json::to_value(value).map_err(|e| GatewayError::Decode { table, reason: e.to_string() })
}

pub fn decode<T: DeserializeOwned>(table: Table, row: Row) -> GatewayResult<T> {
    serde_json::from_value(row).map_err(|e| GatewayError::Decode { table, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_all_columns() {
        let filter = Filter::new().eq("status", "PROCESSING").eq("customer_id", "c1");
        assert!(filter.matches(&json!({"status": "PROCESSING", "customer_id": "c1", "x": 1})));
        assert!(!filter.matches(&json!({"status": "PENDING", "customer_id": "c1"})));
        assert!(!filter.matches(&json!({"status": "PROCESSING"})));
        assert!(Filter::new().matches(&json!({"anything": true})));
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    #[test]
    fn test_unencodable_value_poisons_filter() {
        let filter = Filter::new().eq("status", Unencodable).eq("id", "o1");
        assert!(!filter.matches(&json!({"status": null, "id": "o1"})));
        assert!(matches!(filter.check(), Err(GatewayError::InvalidFilter { column, .. }) if column == "status"));
        assert!(Filter::by_id("o1").check().is_ok());
    }

    #[test]
    fn test_append_keeps_order() {
        let batch = WriteBatch::new()
            .insert(Table::Notifications, json!({"id": "n1"}))
            .append(WriteBatch::new().update(Table::Outbox, Filter::by_id("e1"), json!({"status": "DONE"})));
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.ops()[1], WriteOp::Update { table: Table::Outbox, .. }));
    }

    #[test]
    fn test_returns_unique_on_order() {
        assert!(Table::Returns.unique_keys().contains(&&["order_id"][..]));
        assert_eq!(Table::Outbox.name(), "cancellation_outbox");
    }
}
