/// Entity repository over key-value storage.
///
/// Entities are JSON documents stored under `"<entity_name>:<id>"`.
/// Filtered queries have no efficient KV implementation — `find_where`
/// and `count_where` return empty results by design, which keeps the
/// repository surface uniform without pretending the backend can do
/// secondary-index lookups.
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::context::Context;
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::kv::service::KvService;
use crate::pagination::{CursorResult, Paginator};
use crate::query::Condition;

/// KV storage for one entity type.
#[derive(Clone)]
pub struct KvRepository<E: Entity> {
    service: KvService,
    key_prefix: String,
    paginator: Paginator,
    _entity: PhantomData<E>,
}

impl<E: Entity> KvRepository<E> {
    pub fn new(service: &KvService) -> Self {
        Self {
            service: service.clone(),
            key_prefix: format!("{}:", E::entity_name()),
            paginator: Paginator::new(),
            _entity: PhantomData,
        }
    }

    pub fn entity_name(&self) -> &'static str {
        E::entity_name()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn service(&self) -> &KvService {
        &self.service
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
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

    pub async fn get(&self, ctx: &Context, id: &str) -> StoreResult<E> {
        Self::validate_id(id)?;
        let entity: Option<E> = self
            .service
            .get_json(ctx, &self.key(id))
            .await
            .map_err(|e| self.wrap("get", e))?;
        entity.ok_or_else(|| StoreError::record_not_found(E::entity_name(), id))
    }

    pub async fn exists(&self, ctx: &Context, id: &str) -> StoreResult<bool> {
        Self::validate_id(id)?;
        self.service
            .exists(ctx, &self.key(id))
            .await
            .map_err(|e| self.wrap("exists", e))
    }

    pub async fn delete(&self, ctx: &Context, id: &str) -> StoreResult<()> {
        Self::validate_id(id)?;
        let key = self.key(id);

        let exists = self
            .service
            .exists(ctx, &key)
            .await
            .map_err(|e| self.wrap("delete", e))?;
        if !exists {
            return Err(StoreError::record_not_found(E::entity_name(), id));
        }

        self.service
            .delete(ctx, &key)
            .await
            .map_err(|e| self.wrap("delete", e))
    }

    /// Store an entity, stamping `created_at` on first write and
    /// refreshing `updated_at` always.
    pub async fn set(
        &self,
        ctx: &Context,
        entity: &mut E,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        Self::validate_id(entity.id())?;

        let now = Utc::now();
        if entity.created_at().timestamp() == 0 {
            entity.set_created_at(now);
        }
        entity.set_updated_at(now);

        let key = self.key(entity.id());
        self.service
            .set_json(ctx, &key, entity, expiration)
            .await
            .map_err(|e| self.wrap("set", e))
    }

    pub async fn set_with_ttl(
        &self,
        ctx: &Context,
        entity: &mut E,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.set(ctx, entity, Some(ttl)).await
    }

    /// Fetch an entity together with its remaining TTL in seconds
    /// (-1 when the entry has no expiry).
    pub async fn get_with_ttl(&self, ctx: &Context, id: &str) -> StoreResult<(E, i64)> {
        let entity = self.get(ctx, id).await?;
        let ttl = self
            .service
            .ttl(ctx, &self.key(id))
            .await
            .map_err(|e| self.wrap("ttl", e))?
            .unwrap_or(-1);
        Ok((entity, ttl))
    }

    /// Approximate count: the number of keys under this prefix.
    pub async fn count(&self, ctx: &Context) -> StoreResult<i64> {
        let pattern = format!("{}*", self.key_prefix);
        let keys = self
            .service
            .keys(ctx, &pattern)
            .await
            .map_err(|e| self.wrap("count", e))?;
        Ok(keys.len() as i64)
    }

    /// List a page of entities using the adapter's scan token as cursor.
    pub async fn list(
        &self,
        ctx: &Context,
        page_size: i32,
        cursor: &str,
    ) -> StoreResult<CursorResult<E>> {
        self.list_by_pattern(ctx, "*", page_size, cursor).await
    }

    /// List entities whose key (after the prefix) matches the glob.
    pub async fn list_by_pattern(
        &self,
        ctx: &Context,
        pattern: &str,
        page_size: i32,
        cursor: &str,
    ) -> StoreResult<CursorResult<E>> {
        let params = self.paginator.parse_params(page_size, cursor);
        let full_pattern = format!("{}{}", self.key_prefix, pattern);

        let (keys, next_cursor) = self
            .service
            .scan(ctx, &params.cursor, &full_pattern, params.page_size as usize)
            .await
            .map_err(|e| self.wrap("list", e))?;

        let mut items = Vec::with_capacity(keys.len());
        if !keys.is_empty() {
            let values = self
                .service
                .mget(ctx, &keys)
                .await
                .map_err(|e| self.wrap("list", e))?;
            for key in &keys {
                let Some(raw) = values.get(key) else {
                    continue;
                };
                match serde_json::from_slice::<E>(raw) {
                    Ok(entity) => items.push(entity),
                    Err(e) => {
                        warn!(key, error = %e, "skipping undecodable kv entity");
                    }
                }
            }
        }

        let has_more = !next_cursor.is_empty();
        Ok(CursorResult {
            items,
            next_cursor,
            prev_cursor: String::new(),
            has_more,
            total_count: -1,
        })
    }

    // Batch operations.

    pub async fn set_batch(
        &self,
        ctx: &Context,
        entities: &mut [E],
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        for entity in entities.iter() {
            Self::validate_id(entity.id())?;
        }

        let now = Utc::now();
        let mut pairs = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            if entity.created_at().timestamp() == 0 {
                entity.set_created_at(now);
            }
            entity.set_updated_at(now);

            let raw = serde_json::to_vec(entity).map_err(|e| {
                self.wrap("set_batch", StoreError::driver("kv", "encode_json", e))
            })?;
            pairs.push((self.key(entity.id()), raw));
        }

        self.service
            .mset(ctx, pairs, expiration)
            .await
            .map_err(|e| self.wrap("set_batch", e))
    }

    /// Fetch a batch by ID; missing IDs are absent from the result.
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

        let keys: Vec<String> = ids.iter().map(|id| self.key(id)).collect();
        let values = self
            .service
            .mget(ctx, &keys)
            .await
            .map_err(|e| self.wrap("get_batch", e))?;

        let mut result = BTreeMap::new();
        for (id, key) in ids.iter().zip(&keys) {
            if let Some(raw) = values.get(key) {
                match serde_json::from_slice::<E>(raw) {
                    Ok(entity) => {
                        result.insert(id.clone(), entity);
                    }
                    Err(e) => {
                        warn!(key, error = %e, "skipping undecodable kv entity");
                    }
                }
            }
        }
        Ok(result)
    }

    pub async fn delete_batch(&self, ctx: &Context, ids: &[String]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            Self::validate_id(id)?;
        }
        let keys: Vec<String> = ids.iter().map(|id| self.key(id)).collect();
        self.service
            .mdelete(ctx, &keys)
            .await
            .map_err(|e| self.wrap("delete_batch", e))
    }

    // Expiration.

    pub async fn set_expiration(
        &self,
        ctx: &Context,
        id: &str,
        expiration: Duration,
    ) -> StoreResult<()> {
        Self::validate_id(id)?;
        let updated = self
            .service
            .expire(ctx, &self.key(id), expiration)
            .await
            .map_err(|e| self.wrap("expire", e))?;
        if !updated {
            return Err(StoreError::record_not_found(E::entity_name(), id));
        }
        Ok(())
    }

    pub async fn ttl(&self, ctx: &Context, id: &str) -> StoreResult<i64> {
        Self::validate_id(id)?;
        self.service
            .ttl(ctx, &self.key(id))
            .await
            .map_err(|e| self.wrap("ttl", e))?
            .ok_or_else(|| StoreError::record_not_found(E::entity_name(), id))
    }

    // Filtered queries are not supported on KV backends.

    /// Always empty: KV backends have no secondary indexes to filter on.
    pub async fn find_where(
        &self,
        _ctx: &Context,
        _conditions: Vec<Condition>,
    ) -> StoreResult<Vec<E>> {
        Ok(Vec::new())
    }

    /// Always zero; see [`find_where`](Self::find_where).
    pub async fn count_where(
        &self,
        _ctx: &Context,
        _conditions: Vec<Condition>,
    ) -> StoreResult<i64> {
        Ok(0)
    }
}
