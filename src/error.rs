/// Unified error types for the strata storage framework.
///
/// Every error carries a kind, an operation label, whatever context applies
/// (driver, host, table, entity, field) and an optional wrapped cause. The
/// `is_*` predicates inspect the cause chain, never display text; textual
/// inspection of driver errors happens only inside adapter classifiers.
use std::collections::BTreeMap;
use std::error::Error as StdError;

use thiserror::Error;

/// Boxed cause preserved verbatim when wrapping driver errors.
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Main error type for all storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection establishment or liveness failures.
    #[error("connection error during {op} with {driver} driver at {host}: {source}")]
    Connection {
        op: String,
        driver: String,
        host: String,
        #[source]
        source: Cause,
    },

    /// Driver-level failures outside a specific query.
    #[error("driver error with {driver} during {op}: {source}")]
    Driver {
        driver: String,
        op: String,
        #[source]
        source: Cause,
    },

    /// Transaction lifecycle failures (begin, commit, savepoints, timeout).
    #[error("transaction error during {op}")]
    Transaction {
        op: String,
        #[source]
        source: Option<Cause>,
    },

    /// Query execution failures, with the statement that failed.
    #[error("query error during {op} on table {table}: {source}")]
    Query {
        op: String,
        table: String,
        sql: String,
        args: Vec<crate::query::Value>,
        #[source]
        source: Cause,
    },

    /// Repository-level wrapper adding entity and operation context.
    #[error("repository error in {entity}.{op}: {source}")]
    Repository {
        entity: String,
        op: String,
        context: BTreeMap<String, String>,
        #[source]
        source: Cause,
    },

    /// A row or key that was expected to exist does not.
    #[error("record not found in {table} with ID {id}")]
    RecordNotFound { table: String, id: String },

    /// Unique constraint violation, classified by the adapter.
    #[error("duplicate key in {table}")]
    DuplicateKey {
        table: String,
        #[source]
        source: Option<Cause>,
    },

    /// Foreign key constraint violation, classified by the adapter.
    #[error("foreign key violation in {table}")]
    ForeignKey {
        table: String,
        #[source]
        source: Option<Cause>,
    },

    /// Input validation failures.
    #[error("validation error{}: {message}", field_suffix(.field))]
    Validation {
        field: Option<String>,
        message: String,
    },

    /// Configuration failures.
    #[error("config error{}: {message}", field_suffix(.field))]
    Config {
        field: Option<String>,
        message: String,
    },

    /// The adapter cannot express the requested operation.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Declared surface that is intentionally unimplemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Internal invariant failures.
    #[error("internal error: {0}")]
    Internal(String),
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(f) => format!(" for field {f}"),
        None => String::new(),
    }
}

/// Result alias used across the crate.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn connection(
        op: impl Into<String>,
        driver: impl Into<String>,
        host: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Connection {
            op: op.into(),
            driver: driver.into(),
            host: host.into(),
            source: source.into(),
        }
    }

    pub fn driver(
        driver: impl Into<String>,
        op: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Driver {
            driver: driver.into(),
            op: op.into(),
            source: source.into(),
        }
    }

    pub fn transaction(op: impl Into<String>) -> Self {
        Self::Transaction {
            op: op.into(),
            source: None,
        }
    }

    pub fn transaction_with(op: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Transaction {
            op: op.into(),
            source: Some(source.into()),
        }
    }

    pub fn query(
        op: impl Into<String>,
        table: impl Into<String>,
        sql: impl Into<String>,
        args: Vec<crate::query::Value>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Query {
            op: op.into(),
            table: table.into(),
            sql: sql.into(),
            args,
            source: source.into(),
        }
    }

    pub fn repository(
        entity: impl Into<String>,
        op: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        Self::Repository {
            entity: entity.into(),
            op: op.into(),
            context: BTreeMap::new(),
            source: source.into(),
        }
    }

    pub fn record_not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            field: None,
            message: message.into(),
        }
    }

    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Attach a context key/value pair to a repository error; no-op for
    /// other variants.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Repository { context, .. } = &mut self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Iterate this error and every cause beneath it.
    fn chain(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        std::iter::successors(Some(self as &(dyn StdError + 'static)), |err| (*err).source())
    }

    fn any_in_chain(&self, pred: impl Fn(&StoreError) -> bool) -> bool {
        self.chain()
            .filter_map(|err| err.downcast_ref::<StoreError>())
            .any(pred)
    }

    pub fn is_connection_error(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::Connection { .. }))
    }

    pub fn is_driver_error(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::Driver { .. }))
    }

    pub fn is_transaction_error(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::Transaction { .. }))
    }

    pub fn is_query_error(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::Query { .. }))
    }

    pub fn is_record_not_found(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::RecordNotFound { .. }))
    }

    pub fn is_unique_violation(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::DuplicateKey { .. }))
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::ForeignKey { .. }))
    }

    pub fn is_validation_error(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::Validation { .. }))
    }

    pub fn is_config_error(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::Config { .. }))
    }

    pub fn is_not_supported(&self) -> bool {
        self.any_in_chain(|e| matches!(e, StoreError::NotSupported(_)))
    }

    /// The innermost cause — typically the original driver error.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        self.chain().last().expect("chain includes self")
    }

    /// Whether any display message in the cause chain contains one of the
    /// given lowercase patterns. Classifier machinery only; public
    /// predicates never rely on message text.
    pub(crate) fn chain_contains(&self, patterns: &[&str]) -> bool {
        self.chain().any(|err| {
            let text = err.to_string().to_lowercase();
            patterns.iter().any(|p| text.contains(p))
        })
    }

    /// Find the underlying sqlx error anywhere in the chain. Used by
    /// adapter classifiers; not part of the public contract.
    pub(crate) fn sqlx_error(&self) -> Option<&sqlx::Error> {
        self.chain().find_map(|err| err.downcast_ref::<sqlx::Error>())
    }

    /// Find a typed driver error anywhere in the chain.
    pub(crate) fn find_source<T: StdError + 'static>(&self) -> Option<&T> {
        self.chain().find_map(|err| err.downcast_ref::<T>())
    }
}
