/// SQLite adapter.
use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::context::{IsolationLevel, TxOptions};
use crate::error::{StoreError, StoreResult};
use crate::sql::adapter::{classify, Dialect, SqlAdapter};

/// SQLite extended result codes.
const CONSTRAINT_UNIQUE: &str = "2067";
const CONSTRAINT_PRIMARYKEY: &str = "1555";
const CONSTRAINT_FOREIGNKEY: &str = "787";
const BUSY: &str = "5";
const LOCKED: &str = "6";

#[derive(Debug, Default)]
pub struct SqliteAdapter;

impl SqliteAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SqlAdapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connection_string(&self, config: &StoreConfig) -> String {
        let mut path = config.file_path.clone();
        if path.is_empty() {
            path = config.database.clone();
        }
        if path.is_empty() || path == ":memory:" {
            return "sqlite::memory:".to_string();
        }

        let mut params = vec!["mode=rwc".to_string()];
        for (key, value) in &config.options {
            params.push(format!("{key}={value}"));
        }
        format!("sqlite://{}?{}", path, params.join("&"))
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn supports_upsert(&self) -> bool {
        true
    }

    fn migration_table_sql(&self) -> &'static str {
        "CREATE TABLE IF NOT EXISTS schema_migrations (\n\
         \tversion TEXT PRIMARY KEY,\n\
         \tapplied_at DATETIME DEFAULT CURRENT_TIMESTAMP\n\
         )"
    }

    /// SQLite transactions are always serializable.
    fn default_tx_options(&self) -> TxOptions {
        TxOptions {
            read_only: false,
            isolation: IsolationLevel::Serializable,
            ..TxOptions::default()
        }
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Isolation is fixed and read-only is advisory; nothing to emit.
    fn tx_setup_sql(&self, _opts: &TxOptions) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn is_unique_violation(&self, err: &StoreError) -> bool {
        matches!(
            classify::code(err).as_deref(),
            Some(CONSTRAINT_UNIQUE) | Some(CONSTRAINT_PRIMARYKEY)
        ) || classify::message_contains(err, &["unique constraint failed"])
    }

    fn is_foreign_key_violation(&self, err: &StoreError) -> bool {
        classify::code(err).as_deref() == Some(CONSTRAINT_FOREIGNKEY)
            || classify::message_contains(err, &["foreign key constraint failed"])
    }

    fn is_retryable(&self, err: &StoreError) -> bool {
        matches!(classify::code(err).as_deref(), Some(BUSY) | Some(LOCKED))
            || classify::message_contains(err, &["database is locked", "database table is locked"])
    }
}
