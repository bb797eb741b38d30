/// Configuration for storage backends.
///
/// One config shape serves every backend family; adapters read the fields
/// they care about and ignore the rest. Durations are plain seconds, zero
/// meaning "unset".
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Unified storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend type: "postgres", "mysql", "sqlite", "redis", "memory",
    /// "filesystem".
    #[serde(rename = "type")]
    pub kind: String,

    // Connection details for network backends.
    pub host: String,
    pub port: u16,
    /// Database name for SQL, database index for Redis.
    pub database: String,
    pub username: String,
    pub password: String,

    /// SQLite file path or filesystem root.
    pub file_path: String,

    // Connection pooling.
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    /// Seconds; 0 = unset.
    pub conn_max_lifetime: u64,
    /// Seconds; 0 = unset.
    pub conn_max_idle_time: u64,

    // Timeouts, in seconds; 0 = unset.
    pub connect_timeout: u64,
    pub query_timeout: u64,

    /// "disable", "require" or "verify-full".
    pub ssl_mode: String,

    pub enable_metrics: bool,

    /// Backend-specific escape hatch, appended to connection strings as
    /// query parameters.
    pub options: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            host: "localhost".to_string(),
            port: 0,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            file_path: String::new(),
            max_open_conns: 25,
            max_idle_conns: 10,
            conn_max_lifetime: 3600,
            conn_max_idle_time: 0,
            connect_timeout: 30,
            query_timeout: 30,
            ssl_mode: "disable".to_string(),
            enable_metrics: false,
            options: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// PostgreSQL defaults.
    pub fn postgres(database: &str, username: &str, password: &str) -> Self {
        Self {
            kind: "postgres".to_string(),
            port: 5432,
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    /// MySQL defaults.
    pub fn mysql(database: &str, username: &str, password: &str) -> Self {
        Self {
            kind: "mysql".to_string(),
            port: 3306,
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    /// SQLite defaults. SQLite works best with a single connection.
    pub fn sqlite(file_path: &str) -> Self {
        Self {
            kind: "sqlite".to_string(),
            file_path: file_path.to_string(),
            max_open_conns: 1,
            ..Self::default()
        }
    }

    /// Redis defaults.
    pub fn redis(host: &str, port: u16) -> Self {
        Self {
            kind: "redis".to_string(),
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    /// In-memory KV store; nothing to configure.
    pub fn memory() -> Self {
        Self {
            kind: "memory".to_string(),
            ..Self::default()
        }
    }

    /// Local filesystem file store rooted at `root`.
    pub fn filesystem(root: &str) -> Self {
        Self {
            kind: "filesystem".to_string(),
            file_path: root.to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from `STRATA_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> StoreResult<Self> {
        dotenv::dotenv().ok();

        let mut config = Self {
            kind: env::var("STRATA_TYPE").unwrap_or_default(),
            host: env::var("STRATA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            ..Self::default()
        };

        if let Ok(port) = env::var("STRATA_PORT") {
            config.port = port
                .parse()
                .map_err(|_| StoreError::config_field("port", "invalid port number"))?;
        }
        if let Ok(v) = env::var("STRATA_DATABASE") {
            config.database = v;
        }
        if let Ok(v) = env::var("STRATA_USERNAME") {
            config.username = v;
        }
        if let Ok(v) = env::var("STRATA_PASSWORD") {
            config.password = v;
        }
        if let Ok(v) = env::var("STRATA_FILE_PATH") {
            config.file_path = v;
        }
        if let Ok(v) = env::var("STRATA_SSL_MODE") {
            config.ssl_mode = v;
        }
        if let Ok(v) = env::var("STRATA_MAX_OPEN_CONNS") {
            config.max_open_conns = v.parse().unwrap_or(config.max_open_conns);
        }
        if let Ok(v) = env::var("STRATA_MAX_IDLE_CONNS") {
            config.max_idle_conns = v.parse().unwrap_or(config.max_idle_conns);
        }
        if let Ok(v) = env::var("STRATA_CONNECT_TIMEOUT") {
            config.connect_timeout = v.parse().unwrap_or(config.connect_timeout);
        }
        if let Ok(v) = env::var("STRATA_QUERY_TIMEOUT") {
            config.query_timeout = v.parse().unwrap_or(config.query_timeout);
        }
        config.enable_metrics = env::var("STRATA_ENABLE_METRICS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(config)
    }

    /// Basic validation; adapters may enforce more.
    pub fn validate(&self) -> StoreResult<()> {
        if self.kind.is_empty() {
            return Err(StoreError::config_field("type", "type cannot be empty"));
        }

        match self.kind.as_str() {
            "postgres" | "postgresql" | "mysql" => {
                if self.database.is_empty() {
                    return Err(StoreError::config_field(
                        "database",
                        format!("database name required for {}", self.kind),
                    ));
                }
                if self.username.is_empty() {
                    return Err(StoreError::config_field(
                        "username",
                        format!("username required for {}", self.kind),
                    ));
                }
            }
            "sqlite" | "sqlite3" => {
                if self.file_path.is_empty() {
                    return Err(StoreError::config_field(
                        "file_path",
                        "file path required for SQLite",
                    ));
                }
            }
            "filesystem" => {
                if self.file_path.is_empty() {
                    return Err(StoreError::config_field(
                        "file_path",
                        "root path required for filesystem storage",
                    ));
                }
            }
            "memory" | "redis" => {}
            other => {
                return Err(StoreError::config(format!("unsupported type: {other}")));
            }
        }

        Ok(())
    }

    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        (self.connect_timeout > 0).then(|| Duration::from_secs(self.connect_timeout))
    }

    pub fn query_timeout_duration(&self) -> Option<Duration> {
        (self.query_timeout > 0).then(|| Duration::from_secs(self.query_timeout))
    }

    pub fn conn_max_lifetime_duration(&self) -> Option<Duration> {
        (self.conn_max_lifetime > 0).then(|| Duration::from_secs(self.conn_max_lifetime))
    }

    pub fn conn_max_idle_time_duration(&self) -> Option<Duration> {
        (self.conn_max_idle_time > 0).then(|| Duration::from_secs(self.conn_max_idle_time))
    }
}
