//! PostgreSQL gateway
//!
//! Rows are exchanged as `jsonb`. Reads go through `to_jsonb` and writes through
//! `jsonb_populate_record`. A filter is decoded into a typed record `f` and
//! compared column by column, so `t.id = f.id` can use the table's indexes.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use super::{DataGateway, Filter, GatewayError, GatewayResult, Row, Table, WriteBatch, WriteOp};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn patch_columns(patch: &Row) -> GatewayResult<Vec<String>> {
    let Value::Object(map) = patch else {
        return Err(GatewayError::InvalidColumn("patch is not an object".into()));
    };
    map.keys()
        .map(|k| if is_identifier(k) { Ok(k.clone()) } else { Err(GatewayError::InvalidColumn(k.clone())) })
        .collect()
}

fn map_err(table: Table, e: sqlx::Error) -> GatewayError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => GatewayError::Conflict { table },
        _ => e.into(),
    }
}

fn filter_record(table: Table) -> String { format!("jsonb_populate_record(NULL::{table}, $1::jsonb) AS f") }

/// Equality predicates against the decoded filter record `f`.
fn where_clause(filter: &Filter) -> GatewayResult<String> {
    filter.check()?;
    let predicates = filter
        .columns()
        .map(|(column, value)| {
            if !is_identifier(column) { return Err(GatewayError::InvalidColumn(column.clone())); }
            Ok(if value.is_null() { format!("t.{column} IS NULL") } else { format!("t.{column} = f.{column}") })
        })
        .collect::<GatewayResult<Vec<_>>>()?;
    Ok(if predicates.is_empty() { "TRUE".to_string() } else { predicates.join(" AND ") })
}

fn select_sql(table: Table, filter: &Filter) -> GatewayResult<String> {
    Ok(format!("SELECT to_jsonb(t) FROM {table} AS t, {} WHERE {}", filter_record(table), where_clause(filter)?))
}

fn insert_sql(table: Table) -> String {
    format!("INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1::jsonb) RETURNING to_jsonb({table}.*)")
}

fn update_sql(table: Table, columns: &[String], filter: &Filter) -> GatewayResult<String> {
    let cols = columns.join(", ");
    Ok(format!(
        "UPDATE {table} AS t SET ({cols}) = (SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $2::jsonb)) \
         FROM {} WHERE {} RETURNING to_jsonb(t)",
        filter_record(table),
        where_clause(filter)?
    ))
}

fn delete_sql(table: Table, filter: &Filter) -> GatewayResult<String> {
    Ok(format!("DELETE FROM {table} AS t USING {} WHERE {}", filter_record(table), where_clause(filter)?))
}

async fn update_in(
    tx: &mut Transaction<'_, Postgres>,
    table: Table,
    filter: &Filter,
    patch: &Row,
) -> GatewayResult<Vec<Row>> {
    let columns = patch_columns(patch)?;
    if columns.is_empty() {
        return sqlx::query_scalar::<_, Value>(&select_sql(table, filter)?)
            .bind(filter.as_json())
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_err(table, e));
    }
    sqlx::query_scalar::<_, Value>(&update_sql(table, &columns, filter)?)
        .bind(filter.as_json())
        .bind(patch)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_err(table, e))
}

#[async_trait]
impl DataGateway for PgGateway {
    async fn select(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Row>> {
        sqlx::query_scalar::<_, Value>(&select_sql(table, filter)?)
            .bind(filter.as_json())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_err(table, e))
    }

    async fn insert(&self, table: Table, row: Row) -> GatewayResult<Row> {
        sqlx::query_scalar::<_, Value>(&insert_sql(table))
            .bind(&row)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_err(table, e))
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> GatewayResult<Vec<Row>> {
        let mut tx = self.pool.begin().await?;
        let rows = update_in(&mut tx, table, filter, &patch).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> GatewayResult<u64> {
        let done = sqlx::query(&delete_sql(table, filter)?)
            .bind(filter.as_json())
            .execute(&self.pool)
            .await
            .map_err(|e| map_err(table, e))?;
        Ok(done.rows_affected())
    }

    async fn commit(&self, batch: WriteBatch) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await?;
        for op in batch.ops() {
            match op {
                WriteOp::Insert { table, row } => {
                    sqlx::query(&insert_sql(*table))
                        .bind(row)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_err(*table, e))?;
                }
                WriteOp::Update { table, filter, patch } => {
                    if update_in(&mut tx, *table, filter, patch).await?.is_empty() {
                        // Dropping the transaction rolls it back.
                        return Err(GatewayError::PreconditionFailed { table: *table });
                    }
                }
            }
        }
        tx.commit().await?;
        tracing::debug!(ops = batch.len(), "Committed write batch");
        Ok(())
    }
}
