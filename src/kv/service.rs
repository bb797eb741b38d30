/// Key-value service.
///
/// Byte-oriented operations from the adapter connection plus a JSON codec
/// for typed values; all calls are bounded by the context deadline.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::context::Context;
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::kv::adapter::{bounded, KvAdapter, KvConnection, KvStats};
use crate::kv::registry;
use crate::kv::repository::KvRepository;
use crate::pagination::Paginator;

/// A connected key-value storage service.
#[derive(Clone)]
pub struct KvService {
    adapter: Arc<dyn KvAdapter>,
    connection: Arc<dyn KvConnection>,
    config: Arc<StoreConfig>,
}

impl KvService {
    pub fn adapter(&self) -> Arc<dyn KvAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn connection(&self) -> Arc<dyn KvConnection> {
        Arc::clone(&self.connection)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A repository for the given entity type.
    pub fn repository<E: Entity>(&self) -> KvRepository<E> {
        KvRepository::new(self)
    }

    // Basic operations.

    pub async fn get(&self, ctx: &Context, key: &str) -> StoreResult<Option<Vec<u8>>> {
        bounded(ctx, "get", self.connection.get(ctx, key)).await
    }

    pub async fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        bounded(ctx, "set", self.connection.set(ctx, key, value, expiration)).await
    }

    pub async fn delete(&self, ctx: &Context, key: &str) -> StoreResult<()> {
        bounded(ctx, "delete", self.connection.delete(ctx, key)).await
    }

    pub async fn exists(&self, ctx: &Context, key: &str) -> StoreResult<bool> {
        bounded(ctx, "exists", self.connection.exists(ctx, key)).await
    }

    // JSON codec.

    /// Get and decode a JSON value; `None` when the key is missing.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let Some(raw) = self.get(ctx, key).await? else {
            debug!(key, "kv miss");
            return Ok(None);
        };
        let value = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::driver(self.adapter.name(), "decode_json", e))?;
        Ok(Some(value))
    }

    /// Encode and store a JSON value.
    pub async fn set_json<T: Serialize>(
        &self,
        ctx: &Context,
        key: &str,
        value: &T,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        let raw = serde_json::to_vec(value)
            .map_err(|e| StoreError::driver(self.adapter.name(), "encode_json", e))?;
        self.set(ctx, key, raw, expiration).await
    }

    // Batch operations.

    pub async fn mget(
        &self,
        ctx: &Context,
        keys: &[String],
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        bounded(ctx, "mget", self.connection.mget(ctx, keys)).await
    }

    pub async fn mset(
        &self,
        ctx: &Context,
        pairs: Vec<(String, Vec<u8>)>,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        bounded(ctx, "mset", self.connection.mset(ctx, pairs, expiration)).await
    }

    pub async fn mdelete(&self, ctx: &Context, keys: &[String]) -> StoreResult<()> {
        bounded(ctx, "mdelete", self.connection.mdelete(ctx, keys)).await
    }

    // Pattern operations.

    pub async fn keys(&self, ctx: &Context, pattern: &str) -> StoreResult<Vec<String>> {
        bounded(ctx, "keys", self.connection.keys(ctx, pattern)).await
    }

    pub async fn scan(
        &self,
        ctx: &Context,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(Vec<String>, String)> {
        bounded(ctx, "scan", self.connection.scan(ctx, cursor, pattern, count)).await
    }

    /// Scan with the standard page-size clamping applied.
    pub async fn scan_with_pagination(
        &self,
        ctx: &Context,
        pattern: &str,
        page_size: i32,
        cursor: &str,
    ) -> StoreResult<(Vec<String>, String)> {
        let params = Paginator::new().parse_params(page_size, cursor);
        self.scan(ctx, &params.cursor, pattern, params.page_size as usize)
            .await
    }

    // Expiration.

    /// Returns false when the key does not exist.
    pub async fn expire(
        &self,
        ctx: &Context,
        key: &str,
        expiration: Duration,
    ) -> StoreResult<bool> {
        bounded(ctx, "expire", self.connection.expire(ctx, key, expiration)).await
    }

    /// Remaining TTL in seconds: `Some(-1)` for no expiry, `None` for a
    /// missing key.
    pub async fn ttl(&self, ctx: &Context, key: &str) -> StoreResult<Option<i64>> {
        bounded(ctx, "ttl", self.connection.ttl(ctx, key)).await
    }

    // Atomics.

    pub async fn incr(&self, ctx: &Context, key: &str) -> StoreResult<i64> {
        self.incr_by(ctx, key, 1).await
    }

    pub async fn incr_by(&self, ctx: &Context, key: &str, delta: i64) -> StoreResult<i64> {
        bounded(ctx, "incr_by", self.connection.incr_by(ctx, key, delta)).await
    }

    pub async fn decr(&self, ctx: &Context, key: &str) -> StoreResult<i64> {
        self.incr_by(ctx, key, -1).await
    }

    pub async fn decr_by(&self, ctx: &Context, key: &str, delta: i64) -> StoreResult<i64> {
        self.incr_by(ctx, key, -delta).await
    }

    // Health and lifecycle.

    pub async fn ping(&self, ctx: &Context) -> StoreResult<()> {
        bounded(ctx, "ping", self.connection.ping(ctx)).await
    }

    pub async fn stats(&self, ctx: &Context) -> StoreResult<KvStats> {
        self.connection.stats(ctx).await
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.connection.close().await
    }
}

/// Open a KV service with an explicit adapter: connect, then ping within
/// the configured connect timeout.
pub async fn open(adapter: Arc<dyn KvAdapter>, config: StoreConfig) -> StoreResult<KvService> {
    config.validate()?;

    let connection = adapter.connect(&config).await?;
    let service = KvService {
        adapter,
        connection,
        config: Arc::new(config),
    };

    let ping_ctx = match service.config.connect_timeout_duration() {
        Some(timeout) => Context::background().with_timeout(timeout),
        None => Context::background(),
    };
    if let Err(e) = service.ping(&ping_ctx).await {
        let _ = service.close().await;
        return Err(StoreError::connection(
            "ping",
            service.adapter.name(),
            &service.config.host,
            e,
        ));
    }

    info!(adapter = service.adapter.name(), "kv service connected");
    Ok(service)
}

/// Open a KV service by adapter name, resolved from the global registry.
pub async fn open_with_name(name: &str, config: StoreConfig) -> StoreResult<KvService> {
    let adapter = registry::get(name)?;
    open(adapter, config).await
}
