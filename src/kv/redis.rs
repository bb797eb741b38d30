/// Redis KV adapter on a multiplexed connection manager.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::kv::adapter::{KvAdapter, KvConnection, KvStats};

#[derive(Debug, Default)]
pub struct RedisAdapter;

impl RedisAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KvAdapter for RedisAdapter {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn connection_string(&self, config: &StoreConfig) -> String {
        let mut url = String::from("redis://");
        if !config.username.is_empty() || !config.password.is_empty() {
            url.push_str(&config.username);
            if !config.password.is_empty() {
                url.push(':');
                url.push_str(&config.password);
            }
            url.push('@');
        }
        url.push_str(if config.host.is_empty() {
            "localhost"
        } else {
            &config.host
        });
        url.push_str(&format!(":{}", if config.port > 0 { config.port } else { 6379 }));
        // The database field doubles as the Redis database index.
        if let Ok(db) = config.database.parse::<u32>() {
            url.push_str(&format!("/{db}"));
        }
        url
    }

    async fn connect(&self, config: &StoreConfig) -> StoreResult<Arc<dyn KvConnection>> {
        let url = self.connection_string(config);
        info!(host = %config.host, "connecting to redis");

        let client = Client::open(url.as_str())
            .map_err(|e| StoreError::connection("connect", "redis", &config.host, e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::connection("connect", "redis", &config.host, e))?;

        Ok(Arc::new(RedisConnection { manager }))
    }

    fn supports_expiration(&self) -> bool {
        true
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn supports_pipelining(&self) -> bool {
        true
    }

    fn supports_pattern_matching(&self) -> bool {
        true
    }

    fn is_connection_error(&self, err: &StoreError) -> bool {
        match err.find_source::<redis::RedisError>() {
            Some(redis_err) => {
                redis_err.is_io_error() || redis_err.is_connection_refusal()
            }
            None => err.is_connection_error(),
        }
    }

    fn is_timeout(&self, err: &StoreError) -> bool {
        match err.find_source::<redis::RedisError>() {
            Some(redis_err) => redis_err.is_timeout(),
            None => err.chain_contains(&["timeout", "timed out"]),
        }
    }
}

struct RedisConnection {
    manager: ConnectionManager,
}

impl RedisConnection {
    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    fn wrap(op: &str, err: redis::RedisError) -> StoreError {
        StoreError::driver("redis", op, err)
    }
}

#[async_trait]
impl KvConnection for RedisConnection {
    async fn get(&self, _ctx: &Context, key: &str) -> StoreResult<Option<Vec<u8>>> {
        debug!(key, "redis GET");
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(|e| Self::wrap("get", e))?;
        Ok(value)
    }

    async fn set(
        &self,
        _ctx: &Context,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> StoreResult<()> {
        debug!(key, ttl = ?expiration, "redis SET");
        let mut conn = self.conn();
        match expiration {
            Some(ttl) if !ttl.is_zero() => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| Self::wrap("set", e))?;
            }
            _ => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .map_err(|e| Self::wrap("set", e))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, key: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Self::wrap("delete", e))?;
        Ok(())
    }

    async fn exists(&self, _ctx: &Context, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        conn.exists(key).await.map_err(|e| Self::wrap("exists", e))
    }

    async fn mget(
        &self,
        _ctx: &Context,
        keys: &[String],
    ) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values: Vec<Option<Vec<u8>>> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::wrap("mget", e))?;

        let mut result = BTreeMap::new();
        for (key, value) in keys.iter().zip(values) {
            if let Some(value) = value {
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
        if pairs.is_empty() {
            return Ok(());
        }
        // MSET has no TTL form; with an expiration each key is SETEX'd.
        if expiration.is_some() {
            for (key, value) in pairs {
                self.set(ctx, &key, value, expiration).await?;
            }
            return Ok(());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("MSET");
        for (key, value) in &pairs {
            cmd.arg(key).arg(value);
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::wrap("mset", e))?;
        Ok(())
    }

    async fn mdelete(&self, _ctx: &Context, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::wrap("mdelete", e))?;
        Ok(())
    }

    async fn keys(&self, _ctx: &Context, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        conn.keys(pattern).await.map_err(|e| Self::wrap("keys", e))
    }

    async fn scan(
        &self,
        _ctx: &Context,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(Vec<String>, String)> {
        let mut conn = self.conn();
        let start = if cursor.is_empty() { "0" } else { cursor };
        let (next, keys): (String, Vec<String>) = redis::cmd("SCAN")
            .arg(start)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::wrap("scan", e))?;

        // Redis reports exhaustion with cursor "0"; the paging contract
        // uses an empty token.
        let next = if next == "0" { String::new() } else { next };
        Ok((keys, next))
    }

    async fn expire(
        &self,
        _ctx: &Context,
        key: &str,
        expiration: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        conn.expire(key, expiration.as_secs().max(1) as i64)
            .await
            .map_err(|e| Self::wrap("expire", e))
    }

    async fn ttl(&self, _ctx: &Context, key: &str) -> StoreResult<Option<i64>> {
        let mut conn = self.conn();
        let ttl: i64 = conn.ttl(key).await.map_err(|e| Self::wrap("ttl", e))?;
        match ttl {
            -2 => Ok(None),
            other => Ok(Some(other)),
        }
    }

    async fn incr_by(&self, _ctx: &Context, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn();
        conn.incr(key, delta)
            .await
            .map_err(|e| Self::wrap("incr_by", e))
    }

    async fn ping(&self, _ctx: &Context) -> StoreResult<()> {
        let mut conn = self.conn();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::wrap("ping", e))?;
        if pong != "PONG" {
            return Err(StoreError::Internal(
                "unexpected redis PING response".to_string(),
            ));
        }
        Ok(())
    }

    async fn stats(&self, _ctx: &Context) -> StoreResult<KvStats> {
        let mut conn = self.conn();
        let info: String = redis::cmd("INFO")
            .arg("stats")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::wrap("stats", e))?;

        let mut stats = KvStats::default();
        for line in info.lines() {
            if let Some(hits) = line.strip_prefix("keyspace_hits:") {
                stats.hits = hits.trim().parse().unwrap_or(0);
            } else if let Some(misses) = line.strip_prefix("keyspace_misses:") {
                stats.misses = misses.trim().parse().unwrap_or(0);
            }
        }
        Ok(stats)
    }

    async fn close(&self) -> StoreResult<()> {
        // The connection manager closes with its last clone.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_defaults() {
        let config = StoreConfig::redis("localhost", 0);
        assert_eq!(
            RedisAdapter::new().connection_string(&config),
            "redis://localhost:6379"
        );
    }

    #[test]
    fn connection_string_with_auth_and_db() {
        let mut config = StoreConfig::redis("cache.internal", 6380);
        config.password = "hunter2".to_string();
        config.database = "3".to_string();
        assert_eq!(
            RedisAdapter::new().connection_string(&config),
            "redis://:hunter2@cache.internal:6380/3"
        );
    }
}
