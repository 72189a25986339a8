//! In-memory gateway for tests and local runs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{DataGateway, Filter, GatewayError, GatewayResult, Row, Table, WriteBatch, WriteOp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op { Select, Insert, Update, Delete }

type Tables = HashMap<Table, Vec<Row>>;

/// Thread-safe store enforcing the same unique keys as the SQL schema.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    tables: Arc<RwLock<Tables>>,
    failures: Arc<RwLock<HashSet<(Table, Op)>>>,
}

impl InMemoryGateway {
    pub fn new() -> Self { Self::default() }

    /// Makes every `op` on `table` fail with a storage error until cleared.
    pub fn fail_on(&self, table: Table, op: Op) { self.failures.write().insert((table, op)); }

    pub fn clear_failures(&self) { self.failures.write().clear(); }

    pub fn rows(&self, table: Table) -> Vec<Row> { self.tables.read().get(&table).cloned().unwrap_or_default() }

    /// Every call yields once, standing in for the network round-trip so that
    /// concurrent callers interleave the way they would against a remote store.
    async fn round_trip(&self, table: Table, op: Op) -> GatewayResult<()> {
        tokio::task::yield_now().await;
        self.check(table, op)
    }

    fn check(&self, table: Table, op: Op) -> GatewayResult<()> {
        if self.failures.read().contains(&(table, op)) {
            return Err(GatewayError::Storage(format!("injected {op:?} failure on {table}")));
        }
        Ok(())
    }
}

fn violates_unique(table: Table, rows: &[Row], candidate: &Row, skip: Option<usize>) -> bool {
    table.unique_keys().iter().any(|key| {
        let values: Vec<&Value> = key.iter().map(|c| candidate.get(*c).unwrap_or(&Value::Null)).collect();
        if values.iter().any(|v| v.is_null()) { return false; }
        rows.iter().enumerate().filter(|(i, _)| Some(*i) != skip).any(|(_, row)| {
            key.iter().zip(&values).all(|(c, v)| row.get(*c).unwrap_or(&Value::Null) == *v)
        })
    })
}

fn merge(row: &mut Row, patch: &Row) {
    if let (Value::Object(target), Value::Object(changes)) = (row, patch) {
        for (k, v) in changes { target.insert(k.clone(), v.clone()); }
    }
}

fn apply_insert(tables: &mut Tables, table: Table, row: Row) -> GatewayResult<Row> {
    if !row.is_object() {
        return Err(GatewayError::Decode { table, reason: "row is not an object".into() });
    }
    let rows = tables.entry(table).or_default();
    if violates_unique(table, rows, &row, None) { return Err(GatewayError::Conflict { table }); }
    rows.push(row.clone());
    Ok(row)
}

fn apply_update(tables: &mut Tables, table: Table, filter: &Filter, patch: &Row) -> GatewayResult<Vec<Row>> {
    let rows = tables.entry(table).or_default();
    let mut updated = Vec::new();
    for i in 0..rows.len() {
        if !filter.matches(&rows[i]) { continue; }
        let mut next = rows[i].clone();
        merge(&mut next, patch);
        if violates_unique(table, rows, &next, Some(i)) { return Err(GatewayError::Conflict { table }); }
        rows[i] = next.clone();
        updated.push(next);
    }
    Ok(updated)
}

#[async_trait]
impl DataGateway for InMemoryGateway {
    async fn select(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Row>> {
        self.round_trip(table, Op::Select).await?;
        filter.check()?;
        let tables = self.tables.read();
        Ok(tables.get(&table).map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect()).unwrap_or_default())
    }

    async fn insert(&self, table: Table, row: Row) -> GatewayResult<Row> {
        self.round_trip(table, Op::Insert).await?;
        apply_insert(&mut self.tables.write(), table, row)
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> GatewayResult<Vec<Row>> {
        self.round_trip(table, Op::Update).await?;
        filter.check()?;
        let mut tables = self.tables.write();
        // Stage on a copy so a unique violation midway leaves the table untouched.
        let mut staged = tables.clone();
        let updated = apply_update(&mut staged, table, filter, &patch)?;
        *tables = staged;
        Ok(updated)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> GatewayResult<u64> {
        self.round_trip(table, Op::Delete).await?;
        filter.check()?;
        let mut tables = self.tables.write();
        let rows = tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|r| !filter.matches(r));
        Ok((before - rows.len()) as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> GatewayResult<()> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        for op in batch.ops() {
            match op {
                WriteOp::Insert { table, row } => {
                    self.check(*table, Op::Insert)?;
                    apply_insert(&mut staged, *table, row.clone())?;
                }
                WriteOp::Update { table, filter, patch } => {
                    self.check(*table, Op::Update)?;
                    filter.check()?;
                    if apply_update(&mut staged, *table, filter, patch)?.is_empty() {
                        return Err(GatewayError::PreconditionFailed { table: *table });
                    }
                }
            }
        }
        *tables = staged;
        Ok(())
    }
}
