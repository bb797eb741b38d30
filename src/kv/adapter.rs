/// Key-value adapter contract.
///
/// Byte-oriented: the service layers JSON on top. A missing key is
/// signalled with `Option`, not an error; adapter classifiers exist for
/// driver-originated failures only.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::{StoreError, StoreResult};

/// A key-value store adapter (memory, Redis).
#[async_trait]
pub trait KvAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connection string built from the unified config.
    fn connection_string(&self, config: &StoreConfig) -> String;

    async fn connect(&self, config: &StoreConfig) -> StoreResult<Arc<dyn KvConnection>>;

    // Capabilities.

    fn supports_expiration(&self) -> bool;

    fn supports_transactions(&self) -> bool {
        false
    }

    fn supports_pipelining(&self) -> bool {
        false
    }

    fn supports_pattern_matching(&self) -> bool;

    // Error classification.

    fn is_key_not_found(&self, _err: &StoreError) -> bool {
        false
    }

    fn is_connection_error(&self, err: &StoreError) -> bool {
        err.is_connection_error()
    }

    fn is_timeout(&self, err: &StoreError) -> bool {
        err.chain_contains(&["timeout", "timed out"])
    }
}

/// A live connection to a key-value store.
#[async_trait]
pub trait KvConnection: Send + Sync {
    // Basic operations.

    async fn get(&self, ctx: &Context, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> StoreResult<()>;

    async fn delete(&self, ctx: &Context, key: &str) -> StoreResult<()>;

    async fn exists(&self, ctx: &Context, key: &str) -> StoreResult<bool>;

    // Batch operations.

    async fn mget(
        &self,
        ctx: &Context,
        keys: &[String],
    ) -> StoreResult<BTreeMap<String, Vec<u8>>>;

    async fn mset(
        &self,
        ctx: &Context,
        pairs: Vec<(String, Vec<u8>)>,
        expiration: Option<Duration>,
    ) -> StoreResult<()>;

    async fn mdelete(&self, ctx: &Context, keys: &[String]) -> StoreResult<()>;

    // Pattern operations.

    async fn keys(&self, ctx: &Context, pattern: &str) -> StoreResult<Vec<String>>;

    /// Paged key iteration. `cursor` is an adapter-opaque token, empty for
    /// the start; the returned token is empty when iteration is done.
    async fn scan(
        &self,
        ctx: &Context,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(Vec<String>, String)>;

    // Expiration.

    /// Returns false when the key does not exist.
    async fn expire(&self, ctx: &Context, key: &str, expiration: Duration) -> StoreResult<bool>;

    /// Remaining TTL in seconds: `Some(-1)` for no expiry, `Some(0)` for
    /// just-expired, `None` for a missing key.
    async fn ttl(&self, ctx: &Context, key: &str) -> StoreResult<Option<i64>>;

    // Atomics.

    async fn incr_by(&self, ctx: &Context, key: &str, delta: i64) -> StoreResult<i64>;

    // Health.

    async fn ping(&self, ctx: &Context) -> StoreResult<()>;

    async fn stats(&self, ctx: &Context) -> StoreResult<KvStats>;

    async fn close(&self) -> StoreResult<()>;
}

/// Counters exposed by KV connections. Backends fill what they track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KvStats {
    pub keys: i64,
    pub gets: i64,
    pub sets: i64,
    pub deletes: i64,
    pub hits: i64,
    pub misses: i64,
    pub expired: i64,
}

/// Bound a connection call by the context deadline.
pub(crate) async fn bounded<T>(
    ctx: &Context,
    op: &str,
    fut: impl std::future::Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    let timeout_err = || {
        StoreError::driver(
            "kv",
            op,
            std::io::Error::new(std::io::ErrorKind::TimedOut, "context deadline exceeded"),
        )
    };
    match ctx.remaining() {
        Some(remaining) if remaining.is_zero() => Err(timeout_err()),
        Some(remaining) => tokio::time::timeout(remaining, fut)
            .await
            .unwrap_or_else(|_| Err(timeout_err())),
        None => fut.await,
    }
}
