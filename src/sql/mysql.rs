/// MySQL adapter.
use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::context::{IsolationLevel, TxOptions};
use crate::error::{StoreError, StoreResult};
use crate::sql::adapter::{classify, Dialect, SqlAdapter};

/// MySQL error numbers; stable across server versions.
const DUP_ENTRY: &str = "1062";
const NO_REFERENCED_ROW: &str = "1452";
const ROW_IS_REFERENCED: &str = "1451";
const LOCK_DEADLOCK: &str = "1213";
const LOCK_WAIT_TIMEOUT: &str = "1205";

#[derive(Debug, Default)]
pub struct MySqlAdapter;

impl MySqlAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SqlAdapter for MySqlAdapter {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn connection_string(&self, config: &StoreConfig) -> String {
        let mut url = String::from("mysql://");
        if !config.username.is_empty() {
            url.push_str(&config.username);
            if !config.password.is_empty() {
                url.push(':');
                url.push_str(&config.password);
            }
            url.push('@');
        }
        url.push_str(if config.host.is_empty() {
            "localhost"
        } else {
            &config.host
        });
        if config.port > 0 {
            url.push_str(&format!(":{}", config.port));
        }
        url.push('/');
        url.push_str(&config.database);

        let mut params = Vec::new();
        let has_charset = config
            .options
            .keys()
            .any(|k| k.eq_ignore_ascii_case("charset"));
        if !has_charset {
            params.push("charset=utf8mb4".to_string());
        }
        match config.ssl_mode.as_str() {
            "" | "disable" => params.push("ssl-mode=DISABLED".to_string()),
            "require" => params.push("ssl-mode=REQUIRED".to_string()),
            "verify-full" => params.push("ssl-mode=VERIFY_IDENTITY".to_string()),
            other => params.push(format!("ssl-mode={other}")),
        }
        for (key, value) in &config.options {
            params.push(format!("{key}={value}"));
        }
        url.push('?');
        url.push_str(&params.join("&"));
        url
    }

    fn supports_json(&self) -> bool {
        true
    }

    fn supports_fulltext(&self) -> bool {
        true
    }

    /// MySQL has no RETURNING clause; callers use a secondary select.
    fn supports_returning(&self) -> bool {
        false
    }

    /// Via ON DUPLICATE KEY UPDATE.
    fn supports_upsert(&self) -> bool {
        true
    }

    fn migration_table_sql(&self) -> &'static str {
        "CREATE TABLE IF NOT EXISTS schema_migrations (\n\
         \tversion VARCHAR(255) PRIMARY KEY,\n\
         \tapplied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP\n\
         ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
    }

    fn default_tx_options(&self) -> TxOptions {
        TxOptions {
            read_only: false,
            isolation: IsolationLevel::RepeatableRead,
            ..TxOptions::default()
        }
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    /// Rewrite `$N` placeholders to MySQL's `?`. The compiler emits
    /// placeholders in strictly increasing order, so position is preserved.
    fn rewrite_placeholders(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut chars = sql.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '$' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                    chars.next();
                }
                out.push('?');
            } else {
                out.push(c);
            }
        }
        out
    }

    /// MySQL forbids changing transaction characteristics once a
    /// transaction is open, and the type-erased driver offers no pre-BEGIN
    /// hook. The native REPEATABLE READ level is accepted as a no-op;
    /// anything else is reported as unsupported rather than silently
    /// dropped.
    fn tx_setup_sql(&self, opts: &TxOptions) -> StoreResult<Vec<String>> {
        match opts.isolation {
            IsolationLevel::Default | IsolationLevel::RepeatableRead => Ok(Vec::new()),
            other => Err(StoreError::NotSupported(format!(
                "mysql adapter cannot apply isolation level {other:?} inside an open transaction"
            ))),
        }
    }

    fn is_unique_violation(&self, err: &StoreError) -> bool {
        classify::code(err).as_deref() == Some(DUP_ENTRY)
            || classify::message_contains(err, &["duplicate entry"])
    }

    fn is_foreign_key_violation(&self, err: &StoreError) -> bool {
        matches!(
            classify::code(err).as_deref(),
            Some(NO_REFERENCED_ROW) | Some(ROW_IS_REFERENCED)
        ) || classify::message_contains(err, &["foreign key constraint"])
    }

    fn is_retryable(&self, err: &StoreError) -> bool {
        matches!(
            classify::code(err).as_deref(),
            Some(LOCK_DEADLOCK) | Some(LOCK_WAIT_TIMEOUT)
        ) || classify::message_contains(err, &["deadlock found", "lock wait timeout"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_has_charset_and_ssl_mode() {
        let config = StoreConfig::mysql("app", "root", "pw");
        let url = MySqlAdapter::new().connection_string(&config);
        assert_eq!(
            url,
            "mysql://root:pw@localhost:3306/app?charset=utf8mb4&ssl-mode=DISABLED"
        );
    }

    #[test]
    fn custom_charset_is_not_overridden() {
        let mut config = StoreConfig::mysql("app", "root", "pw");
        config.options.insert("charset".into(), "latin1".into());
        let url = MySqlAdapter::new().connection_string(&config);
        assert!(url.contains("charset=latin1"));
        assert!(!url.contains("utf8mb4"));
    }

    #[test]
    fn placeholders_rewrite_to_question_marks() {
        let adapter = MySqlAdapter::new();
        assert_eq!(
            adapter.rewrite_placeholders("SELECT * FROM t WHERE a = $1 AND b IN ($2, $13)"),
            "SELECT * FROM t WHERE a = ? AND b IN (?, ?)"
        );
    }

    #[test]
    fn dollar_without_digit_is_preserved() {
        let adapter = MySqlAdapter::new();
        assert_eq!(adapter.rewrite_placeholders("SELECT '$' FROM t"), "SELECT '$' FROM t");
    }

    #[test]
    fn non_default_isolation_is_unsupported() {
        let adapter = MySqlAdapter::new();
        let err = adapter
            .tx_setup_sql(&TxOptions {
                isolation: IsolationLevel::Serializable,
                ..TxOptions::default()
            })
            .unwrap_err();
        assert!(err.is_not_supported());
    }

    #[test]
    fn quote_identifier_uses_backticks() {
        assert_eq!(MySqlAdapter::new().quote_identifier("order"), "`order`");
    }
}
