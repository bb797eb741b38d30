/// SQL service: a connected pool plus its adapter.
///
/// Services are cheap handles (the pool and adapter are shared); clone
/// freely. `open` wires config → adapter → pool → ping; a failed ping
/// closes the pool and reports a connection error rather than handing out
/// a half-alive service.
use std::sync::Arc;

use sqlx::AnyPool;
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::sql::adapter::SqlAdapter;
use crate::sql::executor::SqlExecutor;
use crate::sql::registry;
use crate::sql::repository::SqlRepository;
use crate::sql::transaction::TransactionManager;

/// Connection pool statistics.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

/// A connected SQL storage service.
#[derive(Clone)]
pub struct SqlService {
    adapter: Arc<dyn SqlAdapter>,
    pool: AnyPool,
    config: Arc<StoreConfig>,
}

impl SqlService {
    pub fn adapter(&self) -> Arc<dyn SqlAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A repository for the given entity type.
    pub fn repository<E: Entity>(&self) -> SqlRepository<E> {
        SqlRepository::new(self)
    }

    pub fn transaction_manager(&self) -> TransactionManager {
        TransactionManager::new(self.pool.clone(), Arc::clone(&self.adapter))
    }

    pub fn executor(&self) -> SqlExecutor {
        SqlExecutor::new(self.pool.clone(), Arc::clone(&self.adapter))
    }

    /// Liveness probe.
    pub async fn ping(&self, ctx: &Context) -> StoreResult<()> {
        self.executor().execute_raw(ctx, "SELECT 1").await?;
        Ok(())
    }

    /// Execute raw SQL — the escape hatch for DDL such as the adapter's
    /// migration table statement.
    pub async fn execute_sql(&self, ctx: &Context, sql: &str) -> StoreResult<u64> {
        self.executor().execute_raw(ctx, sql).await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Open a SQL service with an explicit adapter: validate config, connect
/// the pool (pool limits applied by the adapter), then ping within the
/// configured connect timeout.
pub async fn open(adapter: Arc<dyn SqlAdapter>, config: StoreConfig) -> StoreResult<SqlService> {
    config.validate()?;

    let pool = adapter.connect(&config).await?;
    let service = SqlService {
        adapter,
        pool,
        config: Arc::new(config),
    };

    let ping_ctx = match service.config.connect_timeout_duration() {
        Some(timeout) => Context::background().with_timeout(timeout),
        None => Context::background(),
    };
    if let Err(e) = service.ping(&ping_ctx).await {
        error!(adapter = service.adapter.name(), error = %e, "ping failed, closing pool");
        service.close().await;
        return Err(StoreError::connection(
            "ping",
            service.adapter.name(),
            &service.config.host,
            e,
        ));
    }

    info!(adapter = service.adapter.name(), "sql service connected");
    Ok(service)
}

/// Open a SQL service by adapter name, resolved from the global registry.
pub async fn open_with_name(name: &str, config: StoreConfig) -> StoreResult<SqlService> {
    let adapter = registry::get(name)?;
    open(adapter, config).await
}
