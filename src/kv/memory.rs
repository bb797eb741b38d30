/// In-memory reference KV adapter.
///
/// One guarding lock over the map plus its counters. Expiry is lazy: a
/// read that observes an expired entry deletes it, bumps the `expired`
/// counter and reports a miss — which is why `get` and `exists` take the
/// exclusive lock. Glob support is deliberately minimal: `*`, `prefix*`,
/// or an exact match.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::kv::adapter::{KvAdapter, KvConnection, KvStats};

struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Default)]
struct State {
    data: HashMap<String, StoredValue>,
    stats: KvStats,
}

/// Shared backing store; every connection from one adapter sees the same
/// data.
#[derive(Default)]
struct MemoryStore {
    state: RwLock<State>,
}

/// The in-memory adapter.
#[derive(Default)]
pub struct MemoryAdapter {
    store: Arc<MemoryStore>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn connection_string(&self, _config: &StoreConfig) -> String {
        "memory://localhost".to_string()
    }

    async fn connect(&self, _config: &StoreConfig) -> StoreResult<Arc<dyn KvConnection>> {
        Ok(Arc::new(MemoryConnection {
            store: Arc::clone(&self.store),
        }))
    }

    fn supports_expiration(&self) -> bool {
        true
    }

    fn supports_pattern_matching(&self) -> bool {
        true
    }
}

struct MemoryConnection {
    store: Arc<MemoryStore>,
}

impl MemoryConnection {
    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.store.state.write().expect("memory store poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.store.state.read().expect("memory store poisoned")
    }

    /// Remove an expired entry under the exclusive lock, updating
    /// counters. Returns true when the entry was expired (or absent).
    fn evict_if_expired(state: &mut State, key: &str, now: Instant) -> bool {
        let expired = match state.data.get(key) {
            Some(value) => value.is_expired(now),
            None => return true,
        };
        if expired {
            state.data.remove(key);
            state.stats.keys -= 1;
            state.stats.expired += 1;
        }
        expired
    }
}

#[async_trait]
impl KvConnection for MemoryConnection {
    async fn get(&self, _ctx: &Context, key: &str) -> StoreResult<Option<Vec<u8>>> {
        // Exclusive lock: this read path may delete an expired entry.
        let mut state = self.lock();
        state.stats.gets += 1;

        let now = Instant::now();
        if Self::evict_if_expired(&mut state, key, now) {
            state.stats.misses += 1;
            return Ok(None);
        }
        state.stats.hits += 1;
        Ok(state.data.get(key).map(|v| v.data.clone()))
    }

    async fn set(
        &self,
        _ctx: &Context,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.stats.sets += 1;

        let expires_at = expiration.map(|d| Instant::now() + d);
        if !state.data.contains_key(key) {
            state.stats.keys += 1;
        }
        state.data.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, key: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.stats.deletes += 1;
        if state.data.remove(key).is_some() {
            state.stats.keys -= 1;
        }
        Ok(())
    }

    async fn exists(&self, _ctx: &Context, key: &str) -> StoreResult<bool> {
        let mut state = self.lock();
        let now = Instant::now();
        Ok(!Self::evict_if_expired(&mut state, key, now))
    }

    async fn mget(
        &self,
        ctx: &Context,
        keys: &[String],
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let mut result = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(ctx, key).await? {
                result.insert(key.clone(), value);
            }
        }
        Ok(result)
    }

    async fn mset(
        &self,
        ctx: &Context,
        pairs: Vec<(String, Vec<u8>)>,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        for (key, value) in pairs {
            self.set(ctx, &key, value, expiration).await?;
        }
        Ok(())
    }

    async fn mdelete(&self, ctx: &Context, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            self.delete(ctx, key).await?;
        }
        Ok(())
    }

    async fn keys(&self, _ctx: &Context, pattern: &str) -> StoreResult<Vec<String>> {
        let state = self.read();
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .data
            .iter()
            .filter(|(key, value)| !value.is_expired(now) && match_pattern(key, pattern))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn scan(
        &self,
        ctx: &Context,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(Vec<String>, String)> {
        let keys = self.keys(ctx, pattern).await?;

        let start = if cursor.is_empty() {
            0
        } else {
            keys.iter()
                .position(|k| k == cursor)
                .map(|i| i + 1)
                .unwrap_or(0)
        };
        let end = (start + count).min(keys.len());

        let page: Vec<String> = keys[start..end].to_vec();
        let next_cursor = if end < keys.len() {
            keys[end - 1].clone()
        } else {
            String::new()
        };
        Ok((page, next_cursor))
    }

    async fn expire(
        &self,
        _ctx: &Context,
        key: &str,
        expiration: Duration,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        let now = Instant::now();
        if Self::evict_if_expired(&mut state, key, now) {
            return Ok(false);
        }
        if let Some(value) = state.data.get_mut(key) {
            value.expires_at = Some(now + expiration);
        }
        Ok(true)
    }

    async fn ttl(&self, _ctx: &Context, key: &str) -> StoreResult<Option<i64>> {
        let mut state = self.lock();
        let now = Instant::now();
        let expires_at = match state.data.get(key) {
            Some(value) => value.expires_at,
            None => return Ok(None),
        };
        match expires_at {
            None => Ok(Some(-1)),
            Some(at) if at <= now => {
                Self::evict_if_expired(&mut state, key, now);
                Ok(Some(0))
            }
            Some(at) => Ok(Some(at.duration_since(now).as_secs() as i64)),
        }
    }

    async fn incr_by(&self, _ctx: &Context, key: &str, delta: i64) -> StoreResult<i64> {
        let mut state = self.lock();
        let now = Instant::now();
        Self::evict_if_expired(&mut state, key, now);

        let (parsed, expires_at, existed) = match state.data.get(key) {
            Some(value) => (
                std::str::from_utf8(&value.data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok()),
                value.expires_at,
                true,
            ),
            None => (Some(0), None, false),
        };
        let current = parsed
            .ok_or_else(|| StoreError::validation_field(key, "value is not an integer"))?;

        if !existed {
            state.stats.keys += 1;
        }
        let next = current + delta;
        state.data.insert(
            key.to_string(),
            StoredValue {
                data: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn ping(&self, _ctx: &Context) -> StoreResult<()> {
        Ok(())
    }

    async fn stats(&self, _ctx: &Context) -> StoreResult<KvStats> {
        Ok(self.read().stats)
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// `*` matches anything, `prefix*` matches a prefix, anything else is an
/// exact match. Richer globs are out of scope for this reference adapter.
fn match_pattern(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }
    key == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connection() -> Arc<dyn KvConnection> {
        MemoryAdapter::new()
            .connect(&StoreConfig::memory())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let ctx = Context::background();
        let conn = connection().await;

        conn.set(&ctx, "k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(conn.get(&ctx, "k").await.unwrap(), Some(b"v".to_vec()));

        conn.delete(&ctx, "k").await.unwrap();
        assert_eq!(conn.get(&ctx, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_key_reports_miss_and_counts() {
        let ctx = Context::background();
        let conn = connection().await;

        conn.set(&ctx, "k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(conn.get(&ctx, "k").await.unwrap(), None);
        let stats = conn.stats(&ctx).await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.keys, 0);
    }

    #[tokio::test]
    async fn ttl_semantics() {
        let ctx = Context::background();
        let conn = connection().await;

        conn.set(&ctx, "forever", b"v".to_vec(), None).await.unwrap();
        assert_eq!(conn.ttl(&ctx, "forever").await.unwrap(), Some(-1));

        conn.set(&ctx, "brief", b"v".to_vec(), Some(Duration::from_secs(100)))
            .await
            .unwrap();
        let remaining = conn.ttl(&ctx, "brief").await.unwrap().unwrap();
        assert!(remaining > 0 && remaining <= 100);

        assert_eq!(conn.ttl(&ctx, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn glob_patterns_are_prefix_only() {
        let ctx = Context::background();
        let conn = connection().await;
        for key in ["user:1", "user:2", "order:1"] {
            conn.set(&ctx, key, b"x".to_vec(), None).await.unwrap();
        }

        assert_eq!(conn.keys(&ctx, "*").await.unwrap().len(), 3);
        assert_eq!(
            conn.keys(&ctx, "user:*").await.unwrap(),
            vec!["user:1".to_string(), "user:2".to_string()]
        );
        assert_eq!(
            conn.keys(&ctx, "order:1").await.unwrap(),
            vec!["order:1".to_string()]
        );
        assert!(conn.keys(&ctx, "user").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_pages_through_sorted_keys() {
        let ctx = Context::background();
        let conn = connection().await;
        for i in 1..=5 {
            conn.set(&ctx, &format!("k{i}"), b"x".to_vec(), None)
                .await
                .unwrap();
        }

        let (page1, cursor1) = conn.scan(&ctx, "", "*", 2).await.unwrap();
        assert_eq!(page1, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(cursor1, "k2");

        let (page2, cursor2) = conn.scan(&ctx, &cursor1, "*", 2).await.unwrap();
        assert_eq!(page2, vec!["k3".to_string(), "k4".to_string()]);

        let (page3, cursor3) = conn.scan(&ctx, &cursor2, "*", 2).await.unwrap();
        assert_eq!(page3, vec!["k5".to_string()]);
        assert!(cursor3.is_empty());
    }

    #[tokio::test]
    async fn incr_by_initializes_and_counts() {
        let ctx = Context::background();
        let conn = connection().await;

        assert_eq!(conn.incr_by(&ctx, "n", 1).await.unwrap(), 1);
        assert_eq!(conn.incr_by(&ctx, "n", 5).await.unwrap(), 6);
        assert_eq!(conn.incr_by(&ctx, "n", -2).await.unwrap(), 4);

        conn.set(&ctx, "text", b"abc".to_vec(), None).await.unwrap();
        assert!(conn.incr_by(&ctx, "text", 1).await.is_err());
    }

    #[tokio::test]
    async fn expire_missing_key_returns_false() {
        let ctx = Context::background();
        let conn = connection().await;
        assert!(!conn.expire(&ctx, "ghost", Duration::from_secs(5)).await.unwrap());

        conn.set(&ctx, "k", b"v".to_vec(), None).await.unwrap();
        assert!(conn.expire(&ctx, "k", Duration::from_secs(5)).await.unwrap());
        let ttl = conn.ttl(&ctx, "k").await.unwrap().unwrap();
        assert!(ttl > 0 && ttl <= 5);
    }
}
