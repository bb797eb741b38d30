/// SQL storage family: adapters, compiler, executor, transactions,
/// pagination and the entity repository, all on top of sqlx's type-erased
/// `Any` driver.
pub mod adapter;
pub mod compiler;
pub mod executor;
pub mod mysql;
pub mod pagination;
pub mod postgres;
pub mod registry;
pub mod repository;
pub mod service;
pub mod sqlite;
pub mod transaction;

pub use adapter::{Dialect, SqlAdapter};
pub use compiler::{CompiledSql, SqlCompiler};
pub use executor::SqlExecutor;
pub use pagination::{PageDirection, SqlPaginator};
pub use repository::SqlRepository;
pub use service::{open, open_with_name, SqlService};
pub use transaction::TransactionManager;
