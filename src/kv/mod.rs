/// Key-value storage family: adapter traits, the in-memory reference
/// adapter, the Redis adapter, and the JSON-codec service/repository pair.
pub mod adapter;
pub mod memory;
pub mod redis;
pub mod registry;
pub mod repository;
pub mod service;

pub use adapter::{KvAdapter, KvConnection, KvStats};
pub use memory::MemoryAdapter;
pub use redis::RedisAdapter;
pub use repository::KvRepository;
pub use service::{open, open_with_name, KvService};
