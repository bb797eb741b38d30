/// Entity repository over SQL.
///
/// A repository binds one entity type to a service: it compiles IR against
/// the entity's table, executes through the shared executor, and wraps its
/// work in context transactions so multi-statement operations are atomic.
use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::Utc;

use crate::context::Context;
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::mutation::{self, Mutation};
use crate::pagination::CursorResult;
use crate::query::{self, Condition, Query};
use crate::sql::compiler::SqlCompiler;
use crate::sql::executor::SqlExecutor;
use crate::sql::pagination::{PageDirection, SqlPaginator};
use crate::sql::service::SqlService;
use crate::sql::transaction::TransactionManager;

/// SQL storage for one entity type.
#[derive(Clone)]
pub struct SqlRepository<E: Entity> {
    service: SqlService,
    compiler: SqlCompiler,
    executor: SqlExecutor,
    tx: TransactionManager,
    paginator: SqlPaginator,
    _entity: PhantomData<E>,
}

impl<E: Entity> SqlRepository<E> {
    pub fn new(service: &SqlService) -> Self {
        let adapter = service.adapter();
        Self {
            compiler: SqlCompiler::new(E::table_name(), adapter.dialect()),
            executor: SqlExecutor::new(service.pool().clone(), adapter.clone()),
            tx: TransactionManager::new(service.pool().clone(), adapter),
            paginator: SqlPaginator::new(),
            service: service.clone(),
            _entity: PhantomData,
        }
    }

    pub fn entity_name(&self) -> &'static str {
        E::entity_name()
    }

    pub fn table_name(&self) -> &'static str {
        E::table_name()
    }

    pub fn service(&self) -> &SqlService {
        &self.service
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.tx
    }

    /// Insert the entity, stamping both timestamps.
    pub async fn create(&self, ctx: &Context, entity: &mut E) -> StoreResult<()> {
        Self::validate_id(entity.id())?;

        let now = Utc::now();
        entity.set_created_at(now);
        entity.set_updated_at(now);

        let m: Mutation = mutation::insert(entity.to_values()).into();
        let stmt = self
            .compiler
            .compile_mutation(&m, self.service.adapter().as_ref())
            .map_err(|e| self.wrap("create", e))?;

        self.tx
            .with_tx(ctx, |tx_ctx| {
                let executor = &self.executor;
                let stmt = &stmt;
                async move {
                    executor
                        .execute(&tx_ctx, "create", E::table_name(), stmt)
                        .await?;
                    Ok(())
                }
            })
            .await
            .map_err(|e| self.wrap("create", e))
    }

    /// Update all columns except `created_at`, refreshing `updated_at`.
    pub async fn update(&self, ctx: &Context, entity: &mut E) -> StoreResult<()> {
        Self::validate_id(entity.id())?;

        entity.set_updated_at(Utc::now());
        let id = entity.id().to_string();

        let mut set = entity.to_values();
        set.remove("id");
        set.remove("created_at");

        let m: Mutation = mutation::update(set, Some(query::eq("id", id.as_str()).into())).into();
        let stmt = self
            .compiler
            .compile_mutation(&m, self.service.adapter().as_ref())
            .map_err(|e| self.wrap("update", e))?;

        let result = self
            .tx
            .with_tx(ctx, |tx_ctx| {
                let executor = &self.executor;
                let stmt = &stmt;
                async move {
                    executor
                        .execute(&tx_ctx, "update", E::table_name(), stmt)
                        .await
                }
            })
            .await
            .map_err(|e| self.wrap("update", e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::record_not_found(E::table_name(), id));
        }
        Ok(())
    }

    pub async fn delete(&self, ctx: &Context, id: &str) -> StoreResult<()> {
        Self::validate_id(id)?;

        let m: Mutation = mutation::delete(Some(query::eq("id", id).into())).into();
        let stmt = self
            .compiler
            .compile_mutation(&m, self.service.adapter().as_ref())
            .map_err(|e| self.wrap("delete", e))?;

        let result = self
            .tx
            .with_tx(ctx, |tx_ctx| {
                let executor = &self.executor;
                let stmt = &stmt;
                async move {
                    executor
                        .execute(&tx_ctx, "delete", E::table_name(), stmt)
                        .await
                }
            })
            .await
            .map_err(|e| self.wrap("delete", e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::record_not_found(E::table_name(), id));
        }
        Ok(())
    }

    pub async fn get(&self, ctx: &Context, id: &str) -> StoreResult<E> {
        self.get_with_columns(ctx, id, &[]).await
    }

    /// Fetch by ID with an optional column projection.
    pub async fn get_with_columns(
        &self,
        ctx: &Context,
        id: &str,
        columns: &[&str],
    ) -> StoreResult<E> {
        Self::validate_id(id)?;

        let mut builder = Query::builder().and_where(query::eq("id", id));
        if !columns.is_empty() {
            builder = builder.select(columns);
        }
        let stmt = self
            .compiler
            .compile_query(&builder.build())
            .map_err(|e| self.wrap("get", e))?;

        let row = self
            .tx
            .with_read_tx(ctx, |tx_ctx| {
                let executor = &self.executor;
                let stmt = &stmt;
                async move {
                    executor
                        .fetch_optional(&tx_ctx, "get", E::table_name(), stmt)
                        .await
                }
            })
            .await
            .map_err(|e| self.wrap("get", e))?;

        match row {
            Some(row) => E::from_row(&row).map_err(|e| self.wrap("get", e)),
            None => Err(StoreError::record_not_found(E::table_name(), id)),
        }
    }

    pub async fn exists(&self, ctx: &Context, id: &str) -> StoreResult<bool> {
        Self::validate_id(id)?;

        let q = Query::builder().and_where(query::eq("id", id)).build();
        let stmt = self
            .compiler
            .compile_exists(&q)
            .map_err(|e| self.wrap("exists", e))?;

        let row = self
            .tx
            .with_read_tx(ctx, |tx_ctx| {
                let executor = &self.executor;
                let stmt = &stmt;
                async move {
                    executor
                        .fetch_optional(&tx_ctx, "exists", E::table_name(), stmt)
                        .await
                }
            })
            .await
            .map_err(|e| self.wrap("exists", e))?;

        Ok(row.is_some())
    }

    /// Fetch a batch of entities by ID, keyed by ID in the result. Missing
    /// IDs are simply absent.
    pub async fn get_batch(
        &self,
        ctx: &Context,
        ids: &[String],
    ) -> StoreResult<BTreeMap<String, E>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        for id in ids {
            Self::validate_id(id)?;
        }

        let q = Query::builder()
            .filter(query::in_list("id", ids.to_vec()).into())
            .build();
        let stmt = self
            .compiler
            .compile_query(&q)
            .map_err(|e| self.wrap("get_batch", e))?;

        let rows = self
            .tx
            .with_read_tx(ctx, |tx_ctx| {
                let executor = &self.executor;
                let stmt = &stmt;
                async move {
                    executor
                        .fetch_all(&tx_ctx, "get_batch", E::table_name(), stmt)
                        .await
                }
            })
            .await
            .map_err(|e| self.wrap("get_batch", e))?;

        let mut result = BTreeMap::new();
        for row in &rows {
            let entity = E::from_row(row).map_err(|e| self.wrap("get_batch", e))?;
            result.insert(entity.id().to_string(), entity);
        }
        Ok(result)
    }

    /// Fetch all entities matching the conditions (ANDed together).
    pub async fn find_where(
        &self,
        ctx: &Context,
        conditions: Vec<Condition>,
    ) -> StoreResult<Vec<E>> {
        let q = Self::query_for(conditions).build();
        let stmt = self
            .compiler
            .compile_query(&q)
            .map_err(|e| self.wrap("find_where", e))?;

        let rows = self
            .executor
            .fetch_all(ctx, "find_where", E::table_name(), &stmt)
            .await
            .map_err(|e| self.wrap("find_where", e))?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(E::from_row(row).map_err(|e| self.wrap("find_where", e))?);
        }
        Ok(entities)
    }

    pub async fn find_first(
        &self,
        ctx: &Context,
        conditions: Vec<Condition>,
    ) -> StoreResult<Option<E>> {
        let q = Self::query_for(conditions).limit(1).build();
        let stmt = self
            .compiler
            .compile_query(&q)
            .map_err(|e| self.wrap("find_first", e))?;

        let row = self
            .executor
            .fetch_optional(ctx, "find_first", E::table_name(), &stmt)
            .await
            .map_err(|e| self.wrap("find_first", e))?;

        match row {
            Some(row) => Ok(Some(E::from_row(&row).map_err(|e| self.wrap("find_first", e))?)),
            None => Ok(None),
        }
    }

    pub async fn count_where(
        &self,
        ctx: &Context,
        conditions: Vec<Condition>,
    ) -> StoreResult<i64> {
        let q = Self::query_for(conditions).build();
        let stmt = self
            .compiler
            .compile_count(&q)
            .map_err(|e| self.wrap("count_where", e))?;

        self.executor
            .fetch_count(ctx, "count_where", E::table_name(), &stmt)
            .await
            .map_err(|e| self.wrap("count_where", e))
    }

    pub async fn count(&self, ctx: &Context) -> StoreResult<i64> {
        self.count_where(ctx, Vec::new()).await
    }

    /// List a keyset page ordered by `(created_at asc, id asc)`.
    pub async fn list(
        &self,
        ctx: &Context,
        page_size: i32,
        cursor: &str,
        columns: &[&str],
    ) -> StoreResult<CursorResult<E>> {
        let mut builder = Query::builder();
        if !columns.is_empty() {
            builder = builder.select(columns);
        }
        let base = builder.build();

        self.tx
            .with_read_tx(ctx, |tx_ctx| {
                let paginator = &self.paginator;
                let executor = &self.executor;
                let compiler = &self.compiler;
                let base = &base;
                async move {
                    paginator
                        .execute::<E>(
                            &tx_ctx,
                            executor,
                            compiler,
                            base,
                            page_size,
                            cursor,
                            PageDirection::Forward,
                        )
                        .await
                }
            })
            .await
            .map_err(|e| self.wrap("list", e))
    }

    /// Refresh only the `updated_at` column.
    pub async fn update_timestamp(&self, ctx: &Context, id: &str) -> StoreResult<()> {
        Self::validate_id(id)?;

        let mut set = BTreeMap::new();
        set.insert(
            "updated_at".to_string(),
            crate::query::Value::Timestamp(Utc::now()),
        );
        let m: Mutation = mutation::update(set, Some(query::eq("id", id).into())).into();
        let stmt = self
            .compiler
            .compile_mutation(&m, self.service.adapter().as_ref())
            .map_err(|e| self.wrap("update_timestamp", e))?;

        let result = self
            .executor
            .execute(ctx, "update_timestamp", E::table_name(), &stmt)
            .await
            .map_err(|e| self.wrap("update_timestamp", e))?;

        if result.rows_affected == 0 {
            return Err(StoreError::record_not_found(E::table_name(), id));
        }
        Ok(())
    }

    /// Cheap liveness probe: a `COUNT(*)` against the entity table.
    pub async fn health_check(&self, ctx: &Context) -> StoreResult<()> {
        self.count(ctx).await.map(|_| ())
    }

    fn query_for(conditions: Vec<Condition>) -> crate::query::QueryBuilder {
        let mut builder = Query::builder();
        for cond in conditions {
            builder = builder.and_where(cond);
        }
        builder
    }

    fn validate_id(id: &str) -> StoreResult<()> {
        if id.is_empty() {
            return Err(StoreError::validation("entity ID cannot be empty"));
        }
        Ok(())
    }

    fn wrap(&self, op: &str, err: StoreError) -> StoreError {
        StoreError::repository(E::entity_name(), op, err)
    }
}
