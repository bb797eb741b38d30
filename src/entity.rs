/// Entity reflection contract.
///
/// The framework never inspects domain structs directly; everything it
/// needs — names, the column list, id and timestamps, column values, and
/// scan-from-row — comes through this trait. Serde bounds exist for the KV
/// JSON codec and the cursor machinery, not for SQL.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::query::Value;

/// A row-like domain object with an ID and created/updated timestamps.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Logical entity name; used for KV key prefixes and error context.
    fn entity_name() -> &'static str;

    /// SQL table name.
    fn table_name() -> &'static str;

    /// Column list, in declaration order.
    fn field_names() -> &'static [&'static str];

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;
    fn set_created_at(&mut self, at: DateTime<Utc>);

    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Column values for insert/update compilation. Must include the
    /// timestamp columns.
    fn to_values(&self) -> BTreeMap<String, Value>;

    /// Scan a driver row into a new instance.
    fn from_row(row: &AnyRow) -> StoreResult<Self>;
}

/// Decode a text column. Helper for `Entity::from_row` implementations.
pub fn text_column(row: &AnyRow, column: &str) -> StoreResult<String> {
    row.try_get::<String, _>(column)
        .map_err(|e| StoreError::driver("sql", format!("scan column {column}"), e))
}

/// Decode a nullable text column.
pub fn opt_text_column(row: &AnyRow, column: &str) -> StoreResult<Option<String>> {
    row.try_get::<Option<String>, _>(column)
        .map_err(|e| StoreError::driver("sql", format!("scan column {column}"), e))
}

/// Decode an integer column.
pub fn int_column(row: &AnyRow, column: &str) -> StoreResult<i64> {
    row.try_get::<i64, _>(column)
        .map_err(|e| StoreError::driver("sql", format!("scan column {column}"), e))
}

/// Decode a timestamp column stored in the canonical RFC 3339 text form
/// (see `Value::timestamp_repr`).
pub fn timestamp_column(row: &AnyRow, column: &str) -> StoreResult<DateTime<Utc>> {
    let raw = text_column(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::driver("sql", format!("parse timestamp column {column}"), e)
        })
}
