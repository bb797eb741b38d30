/// Process-global SQL adapter registry.
///
/// Reads are shared, writes exclusive; registration normally happens once
/// at startup. Built-in adapters register themselves (including the
/// `postgres` and `sqlite3` aliases) when the registry is first touched,
/// so there is no cross-module initialization ordering to get wrong.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::sql::adapter::SqlAdapter;
use crate::sql::mysql::MySqlAdapter;
use crate::sql::postgres::PostgresAdapter;
use crate::sql::sqlite::SqliteAdapter;

type Factory = Box<dyn Fn() -> Arc<dyn SqlAdapter> + Send + Sync>;

/// Registry of SQL adapter factories.
pub struct SqlRegistry {
    adapters: RwLock<HashMap<String, Factory>>,
}

impl SqlRegistry {
    /// An empty registry; most callers want [`global`] instead.
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("postgresql", || Arc::new(PostgresAdapter::new()));
        registry.register("postgres", || Arc::new(PostgresAdapter::new()));
        registry.register("mysql", || Arc::new(MySqlAdapter::new()));
        registry.register("sqlite", || Arc::new(SqliteAdapter::new()));
        registry.register("sqlite3", || Arc::new(SqliteAdapter::new()));
        registry
    }

    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn SqlAdapter> + Send + Sync + 'static,
    {
        let mut adapters = self.adapters.write().expect("sql registry poisoned");
        adapters.insert(name.to_string(), Box::new(factory));
    }

    pub fn get(&self, name: &str) -> StoreResult<Arc<dyn SqlAdapter>> {
        let adapters = self.adapters.read().expect("sql registry poisoned");
        match adapters.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(StoreError::driver(
                name,
                "get_adapter",
                StoreError::Internal(format!("adapter '{name}' not found")),
            )),
        }
    }

    pub fn list(&self) -> Vec<String> {
        let adapters = self.adapters.read().expect("sql registry poisoned");
        let mut names: Vec<String> = adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn exists(&self, name: &str) -> bool {
        let adapters = self.adapters.read().expect("sql registry poisoned");
        adapters.contains_key(name)
    }
}

impl Default for SqlRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-global registry, built with the built-in adapters on first
/// access.
pub fn global() -> &'static SqlRegistry {
    static GLOBAL: OnceLock<SqlRegistry> = OnceLock::new();
    GLOBAL.get_or_init(SqlRegistry::with_builtins)
}

pub fn register<F>(name: &str, factory: F)
where
    F: Fn() -> Arc<dyn SqlAdapter> + Send + Sync + 'static,
{
    global().register(name, factory);
}

pub fn get(name: &str) -> StoreResult<Arc<dyn SqlAdapter>> {
    global().get(name)
}

pub fn list() -> Vec<String> {
    global().list()
}

pub fn exists(name: &str) -> bool {
    global().exists(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_and_aliases_resolve() {
        assert!(exists("postgresql"));
        assert!(exists("postgres"));
        assert!(exists("mysql"));
        assert!(exists("sqlite"));
        assert!(exists("sqlite3"));

        assert_eq!(get("postgres").unwrap().name(), "postgresql");
        assert_eq!(get("sqlite3").unwrap().name(), "sqlite");
    }

    #[test]
    fn unknown_adapter_is_a_driver_error() {
        let err = get("oracle").err().unwrap();
        assert!(err.is_driver_error());
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn custom_registration_is_visible() {
        let registry = SqlRegistry::new();
        assert!(!registry.exists("sqlite"));
        registry.register("sqlite", || Arc::new(SqliteAdapter::new()));
        assert!(registry.exists("sqlite"));
        assert_eq!(registry.list(), vec!["sqlite".to_string()]);
    }
}
