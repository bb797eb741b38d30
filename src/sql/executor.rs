/// Compiled-statement execution.
///
/// The executor routes every statement either to the pool or, when the
/// context carries one, to the active transaction — repositories never
/// need to know which. Context deadlines bound each driver call.
use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::any::AnyRow;
use sqlx::AnyPool;
use sqlx::{Column, Row};

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::mutation::MutationResult;
use crate::query::Value;
use crate::sql::adapter::SqlAdapter;
use crate::sql::compiler::CompiledSql;

type AnyQuery<'q> = sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>;

enum ExecError {
    Driver(sqlx::Error),
    DeadlineExceeded,
}

/// Executes compiled SQL against a pool, honoring context transactions
/// and deadlines.
#[derive(Clone)]
pub struct SqlExecutor {
    pool: AnyPool,
    adapter: Arc<dyn SqlAdapter>,
}

impl SqlExecutor {
    pub fn new(pool: AnyPool, adapter: Arc<dyn SqlAdapter>) -> Self {
        Self { pool, adapter }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn fetch_all(
        &self,
        ctx: &Context,
        op: &str,
        table: &str,
        stmt: &CompiledSql,
    ) -> StoreResult<Vec<AnyRow>> {
        let sql = self.adapter.rewrite_placeholders(&stmt.sql);
        let result = if let Some(slot) = ctx.tx_slot() {
            let mut guard = slot.lock().await;
            let tx = guard
                .as_mut()
                .ok_or_else(|| StoreError::transaction("tx_completed"))?;
            with_deadline(ctx, bind_args(&sql, &stmt.args)?.fetch_all(&mut **tx)).await
        } else {
            with_deadline(ctx, bind_args(&sql, &stmt.args)?.fetch_all(&self.pool)).await
        };
        result.map_err(|e| self.wrap(op, table, &sql, &stmt.args, e))
    }

    pub async fn fetch_optional(
        &self,
        ctx: &Context,
        op: &str,
        table: &str,
        stmt: &CompiledSql,
    ) -> StoreResult<Option<AnyRow>> {
        let sql = self.adapter.rewrite_placeholders(&stmt.sql);
        let result = if let Some(slot) = ctx.tx_slot() {
            let mut guard = slot.lock().await;
            let tx = guard
                .as_mut()
                .ok_or_else(|| StoreError::transaction("tx_completed"))?;
            with_deadline(ctx, bind_args(&sql, &stmt.args)?.fetch_optional(&mut **tx)).await
        } else {
            with_deadline(ctx, bind_args(&sql, &stmt.args)?.fetch_optional(&self.pool)).await
        };
        result.map_err(|e| self.wrap(op, table, &sql, &stmt.args, e))
    }

    /// Run a statement whose first column is an integer scalar, e.g.
    /// `COUNT(*)`.
    pub async fn fetch_count(
        &self,
        ctx: &Context,
        op: &str,
        table: &str,
        stmt: &CompiledSql,
    ) -> StoreResult<i64> {
        let row = self
            .fetch_optional(ctx, op, table, stmt)
            .await?
            .ok_or_else(|| {
                StoreError::query(
                    op,
                    table,
                    stmt.sql.clone(),
                    stmt.args.clone(),
                    StoreError::Internal("count query returned no rows".to_string()),
                )
            })?;
        row.try_get::<i64, _>(0)
            .map_err(|e| StoreError::query(op, table, stmt.sql.clone(), stmt.args.clone(), e))
    }

    pub async fn execute(
        &self,
        ctx: &Context,
        op: &str,
        table: &str,
        stmt: &CompiledSql,
    ) -> StoreResult<MutationResult> {
        // Statements with a RETURNING clause produce rows; run them
        // through the fetching path so the output is captured.
        if stmt.returning {
            let rows = self.fetch_all(ctx, op, table, stmt).await?;
            let returning: Vec<BTreeMap<String, Value>> =
                rows.iter().map(returned_row_values).collect();
            return Ok(MutationResult {
                rows_affected: rows.len() as u64,
                last_insert_id: None,
                returning,
            });
        }

        let sql = self.adapter.rewrite_placeholders(&stmt.sql);
        let result = if let Some(slot) = ctx.tx_slot() {
            let mut guard = slot.lock().await;
            let tx = guard
                .as_mut()
                .ok_or_else(|| StoreError::transaction("tx_completed"))?;
            with_deadline(ctx, bind_args(&sql, &stmt.args)?.execute(&mut **tx)).await
        } else {
            with_deadline(ctx, bind_args(&sql, &stmt.args)?.execute(&self.pool)).await
        };
        let done = result.map_err(|e| self.wrap(op, table, &sql, &stmt.args, e))?;
        Ok(MutationResult {
            rows_affected: done.rows_affected(),
            last_insert_id: done.last_insert_id(),
            returning: Vec::new(),
        })
    }

    /// Execute raw SQL with no arguments; the escape hatch for DDL such as
    /// migration table creation.
    pub async fn execute_raw(&self, ctx: &Context, sql: &str) -> StoreResult<u64> {
        let result = if let Some(slot) = ctx.tx_slot() {
            let mut guard = slot.lock().await;
            let tx = guard
                .as_mut()
                .ok_or_else(|| StoreError::transaction("tx_completed"))?;
            with_deadline(ctx, sqlx::query(sql).execute(&mut **tx)).await
        } else {
            with_deadline(ctx, sqlx::query(sql).execute(&self.pool)).await
        };
        let done = result.map_err(|e| self.wrap("execute_sql", "", sql, &[], e))?;
        Ok(done.rows_affected())
    }

    /// Wrap a driver failure with query context, then reclassify the
    /// constraint violations the adapter recognizes.
    fn wrap(&self, op: &str, table: &str, sql: &str, args: &[Value], err: ExecError) -> StoreError {
        let query_err = match err {
            ExecError::Driver(e) => StoreError::query(op, table, sql, args.to_vec(), e),
            ExecError::DeadlineExceeded => StoreError::query(
                op,
                table,
                sql,
                args.to_vec(),
                std::io::Error::new(std::io::ErrorKind::TimedOut, "context deadline exceeded"),
            ),
        };

        if self.adapter.is_unique_violation(&query_err) {
            return StoreError::DuplicateKey {
                table: table.to_string(),
                source: Some(Box::new(query_err)),
            };
        }
        if self.adapter.is_foreign_key_violation(&query_err) {
            return StoreError::ForeignKey {
                table: table.to_string(),
                source: Some(Box::new(query_err)),
            };
        }
        query_err
    }
}

async fn with_deadline<T>(
    ctx: &Context,
    fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, ExecError> {
    match ctx.remaining() {
        Some(remaining) if remaining.is_zero() => Err(ExecError::DeadlineExceeded),
        Some(remaining) => match tokio::time::timeout(remaining, fut).await {
            Ok(result) => result.map_err(ExecError::Driver),
            Err(_) => Err(ExecError::DeadlineExceeded),
        },
        None => fut.await.map_err(ExecError::Driver),
    }
}

/// Decode one RETURNING row into a column → value map.
fn returned_row_values(row: &AnyRow) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    for column in row.columns() {
        values.insert(
            column.name().to_string(),
            decode_column(row, column.ordinal()),
        );
    }
    values
}

/// Best-effort type-erased decode. RETURNING output has no entity schema
/// to scan into, so the driver types are probed in a fixed order.
fn decode_column(row: &AnyRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map(Value::Bytes).unwrap_or(Value::Null);
    }
    Value::Null
}

/// Bind compiled argument values. The compiler flattens lists and ranges,
/// so only scalars reach this point.
fn bind_args<'q>(sql: &'q str, args: &[Value]) -> StoreResult<AnyQuery<'q>> {
    let mut query = sqlx::query(sql);
    for value in args {
        query = match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
            Value::Timestamp(ts) => query.bind(Value::timestamp_repr(ts)),
            Value::List(_) | Value::Range(_, _) => {
                return Err(StoreError::Internal(
                    "non-scalar value reached the executor".to_string(),
                ))
            }
        };
    }
    Ok(query)
}
