use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::KvCache;
use crate::error::{Error, Result};

fn cache_error(e: redis::RedisError) -> Error {
    Error::Cache(e.to_string())
}

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connects to `address` (`host:port`), optionally authenticating and
    /// selecting a database.
    pub async fn connect(address: &str, password: Option<&str>, db: i64) -> Result<Self> {
        let url = match password.filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{password}@{address}/{db}"),
            None => format!("redis://{address}/{db}"),
        };
        let client = redis::Client::open(url).map_err(cache_error)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_error)?;
        tracing::info!("Connected to Redis at {}", address);
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(cache_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(cache_error)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(cache_error)
    }
}
