/// Process-global KV adapter registry.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::kv::adapter::KvAdapter;
use crate::kv::memory::MemoryAdapter;
use crate::kv::redis::RedisAdapter;

type Factory = Box<dyn Fn() -> Arc<dyn KvAdapter> + Send + Sync>;

/// Registry of KV adapter factories.
pub struct KvRegistry {
    adapters: RwLock<HashMap<String, Factory>>,
}

impl KvRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("memory", || Arc::new(MemoryAdapter::new()));
        registry.register("redis", || Arc::new(RedisAdapter::new()));
        registry
    }

    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn KvAdapter> + Send + Sync + 'static,
    {
        let mut adapters = self.adapters.write().expect("kv registry poisoned");
        adapters.insert(name.to_string(), Box::new(factory));
    }

    pub fn get(&self, name: &str) -> StoreResult<Arc<dyn KvAdapter>> {
        let adapters = self.adapters.read().expect("kv registry poisoned");
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
        let adapters = self.adapters.read().expect("kv registry poisoned");
        let mut names: Vec<String> = adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn exists(&self, name: &str) -> bool {
        let adapters = self.adapters.read().expect("kv registry poisoned");
        adapters.contains_key(name)
    }
}

impl Default for KvRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn global() -> &'static KvRegistry {
    static GLOBAL: OnceLock<KvRegistry> = OnceLock::new();
    GLOBAL.get_or_init(KvRegistry::with_builtins)
}

pub fn register<F>(name: &str, factory: F)
where
    F: Fn() -> Arc<dyn KvAdapter> + Send + Sync + 'static,
{
    global().register(name, factory);
}

pub fn get(name: &str) -> StoreResult<Arc<dyn KvAdapter>> {
    global().get(name)
}

pub fn list() -> Vec<String> {
    global().list()
}

pub fn exists(name: &str) -> bool {
    global().exists(name)
}
