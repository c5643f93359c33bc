//! Key-value cache backends and the typed entity caches built on top.

mod entity;
mod memory;
mod redis;

use async_trait::async_trait;

pub use entity::{Cacheable, Caches, EntityCache};
pub use memory::MemoryCache;
pub use self::redis::RedisCache;

use crate::error::Result;

/// String-keyed cache holding JSON values.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Namespaced key, e.g. `file:<id>`.
#[must_use]
pub fn cache_key(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}
