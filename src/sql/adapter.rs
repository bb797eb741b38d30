/// SQL adapter contract.
///
/// An adapter owns everything backend-specific: the connection string, pool
/// construction, capability probes, transaction defaults, identifier
/// quoting, and error classification. Classifiers are the one place where
/// driver error codes and message patterns may be inspected; they prefer
/// stable SQLSTATE / errno values and fall back to message patterns only
/// where a driver reports none.
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::config::StoreConfig;
use crate::context::TxOptions;
use crate::error::{StoreError, StoreResult};

/// SQL syntactic variant accepted by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

/// A SQL database adapter (PostgreSQL, MySQL, SQLite).
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    /// Unique identifier, as registered.
    fn name(&self) -> &'static str;

    fn dialect(&self) -> Dialect;

    /// Connection string (sqlx URL DSN) built from the unified config.
    fn connection_string(&self, config: &StoreConfig) -> String;

    /// Open a connection pool with the config's pool settings applied.
    async fn connect(&self, config: &StoreConfig) -> StoreResult<AnyPool> {
        let url = self.connection_string(config);
        connect_pool(self.name(), config, &url).await
    }

    // Capabilities.

    fn supports_migrations(&self) -> bool {
        true
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn supports_uuid(&self) -> bool {
        false
    }

    fn supports_json(&self) -> bool {
        false
    }

    fn supports_fulltext(&self) -> bool {
        false
    }

    fn supports_returning(&self) -> bool;

    fn supports_upsert(&self) -> bool;

    fn migration_table_name(&self) -> &'static str {
        "schema_migrations"
    }

    /// DDL for the migration bookkeeping table; emitted as a string only,
    /// never executed by the framework.
    fn migration_table_sql(&self) -> &'static str;

    /// Transaction defaults merged under explicit caller options.
    fn default_tx_options(&self) -> TxOptions;

    fn quote_identifier(&self, identifier: &str) -> String;

    /// Post-process compiled SQL placeholders into the driver's dialect.
    /// The compiler always emits `$N`; MySQL rewrites to `?`.
    fn rewrite_placeholders(&self, sql: &str) -> String {
        sql.to_string()
    }

    /// Statements run immediately after BEGIN to apply transaction
    /// characteristics. Returns an error when the requested options cannot
    /// be expressed on this backend.
    fn tx_setup_sql(&self, opts: &TxOptions) -> StoreResult<Vec<String>>;

    // Error classification.

    fn is_unique_violation(&self, err: &StoreError) -> bool;

    fn is_foreign_key_violation(&self, err: &StoreError) -> bool;

    fn is_connection_error(&self, err: &StoreError) -> bool {
        classify::connection_error(err)
    }

    fn is_timeout(&self, err: &StoreError) -> bool {
        classify::timeout_error(err)
    }

    fn is_key_not_found(&self, err: &StoreError) -> bool {
        matches!(err.sqlx_error(), Some(sqlx::Error::RowNotFound))
    }

    /// Serialization failures, deadlocks and lock-wait timeouts that a
    /// retry policy may retry.
    fn is_retryable(&self, err: &StoreError) -> bool;
}

/// Shared pool construction used by every SQL adapter.
pub(crate) async fn connect_pool(
    driver: &str,
    config: &StoreConfig,
    url: &str,
) -> StoreResult<AnyPool> {
    sqlx::any::install_default_drivers();

    let mut options = AnyPoolOptions::new();
    if config.max_open_conns > 0 {
        options = options.max_connections(config.max_open_conns);
    }
    options = options.min_connections(config.max_idle_conns.min(config.max_open_conns));
    if let Some(lifetime) = config.conn_max_lifetime_duration() {
        options = options.max_lifetime(lifetime);
    }
    if let Some(idle) = config.conn_max_idle_time_duration() {
        options = options.idle_timeout(idle);
    }
    if let Some(timeout) = config.connect_timeout_duration() {
        options = options.acquire_timeout(timeout);
    }

    options
        .connect(url)
        .await
        .map_err(|e| StoreError::connection("connect", driver, &config.host, e))
}

/// Classifier building blocks shared by the adapters.
pub(crate) mod classify {
    use crate::error::StoreError;

    /// SQLSTATE / errno of the underlying database error, when present.
    pub fn code(err: &StoreError) -> Option<String> {
        err.sqlx_error()
            .and_then(|e| e.as_database_error())
            .and_then(|db| db.code())
            .map(|c| c.to_string())
    }

    /// Lowercased message of the underlying database error.
    pub fn message(err: &StoreError) -> Option<String> {
        err.sqlx_error()
            .and_then(|e| e.as_database_error())
            .map(|db| db.message().to_lowercase())
    }

    pub fn message_contains(err: &StoreError, patterns: &[&str]) -> bool {
        match message(err) {
            Some(msg) => patterns.iter().any(|p| msg.contains(p)),
            None => false,
        }
    }

    pub fn connection_error(err: &StoreError) -> bool {
        match err.sqlx_error() {
            Some(sqlx::Error::Io(_))
            | Some(sqlx::Error::Tls(_))
            | Some(sqlx::Error::PoolTimedOut)
            | Some(sqlx::Error::PoolClosed) => true,
            Some(_) => message_contains(
                err,
                &[
                    "connection refused",
                    "connection reset",
                    "connection closed",
                    "network is unreachable",
                ],
            ),
            None => err.is_connection_error(),
        }
    }

    pub fn timeout_error(err: &StoreError) -> bool {
        matches!(err.sqlx_error(), Some(sqlx::Error::PoolTimedOut))
            || message_contains(err, &["timeout", "timed out"])
    }
}
