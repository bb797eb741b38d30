//! # strata
//!
//! A backend-agnostic persistence framework: one entity-oriented API over
//! three storage families — relational (PostgreSQL, MySQL, SQLite through
//! sqlx), key-value (in-memory reference and Redis), and content-addressed
//! file storage.
//!
//! The value is the abstraction layer, not the drivers:
//!
//! - a backend-independent filter/mutation IR ([`query`], [`mutation`])
//!   compiled to parameterized SQL with a consistent placeholder dialect
//!   ([`sql::compiler`]);
//! - an opaque, versioned cursor driving keyset pagination with bounded
//!   lifetime ([`pagination`], [`sql::pagination`]);
//! - a transaction orchestrator with context propagation, savepoints and
//!   retry on conflict classes ([`sql::transaction`]);
//! - a content-addressed file engine with streaming ingestion, dedup and
//!   HMAC-signed presigned URLs ([`files`]);
//! - adapter registries with capability probes and error classifiers
//!   ([`sql::registry`], [`kv::registry`]).
//!
//! ## Quick start
//!
//! ```no_run
//! # async fn demo() -> strata::StoreResult<()> {
//! let config = strata::StoreConfig::sqlite("./app.db");
//! let service = strata::sql::open_with_name("sqlite", config).await?;
//! let _ = service.stats();
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod files;
pub mod kv;
pub mod mutation;
pub mod pagination;
pub mod query;
pub mod sql;

pub use config::StoreConfig;
pub use context::{Context, IsolationLevel, RetryPolicy, TxInfo, TxOptions};
pub use entity::Entity;
pub use error::{StoreError, StoreResult};
pub use mutation::{Delete, Insert, Mutation, MutationResult, Update, Upsert};
pub use pagination::{Cursor, CursorParams, CursorResult, PaginationConfig, Paginator};
pub use query::{Condition, Direction, Node, Operator, Order, Query, QueryBuilder, Value};
