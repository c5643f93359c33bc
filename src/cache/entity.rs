use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{KvCache, cache_key};
use crate::error::{Entity, Error, Result};
use crate::store::Store;
use crate::types::{File, Group, Organization, Snapshot, Task, Workspace};

/// An entity kind that can be mirrored in the key-value cache.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync {
    const ENTITY: Entity;

    fn id(&self) -> &str;

    fn load(store: &dyn Store, id: &str) -> Result<Option<Self>>;
}

macro_rules! cacheable {
    ($ty:ty, $entity:expr, $load:ident) => {
        impl Cacheable for $ty {
            const ENTITY: Entity = $entity;

            fn id(&self) -> &str {
                &self.id
            }

            fn load(store: &dyn Store, id: &str) -> Result<Option<Self>> {
                store.$load(id)
            }
        }
    };
}

cacheable!(File, Entity::File, get_file);
cacheable!(Workspace, Entity::Workspace, get_workspace);
cacheable!(Organization, Entity::Organization, get_organization);
cacheable!(Group, Entity::Group, get_group);
cacheable!(Snapshot, Entity::Snapshot, get_snapshot);
cacheable!(Task, Entity::Task, get_task);

/// Read-through mirror of one entity kind. Misses fall back to the store;
/// write failures are logged and swallowed.
pub struct EntityCache<T> {
    kv: Arc<dyn KvCache>,
    store: Arc<dyn Store>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            kv: self.kv.clone(),
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Cacheable> EntityCache<T> {
    pub fn new(kv: Arc<dyn KvCache>, store: Arc<dyn Store>) -> Self {
        Self {
            kv,
            store,
            _marker: PhantomData,
        }
    }

    fn key(id: &str) -> String {
        cache_key(T::ENTITY.as_str(), id)
    }

    pub async fn get(&self, id: &str) -> Result<T> {
        match self.kv.get(&Self::key(id)).await {
            Ok(Some(value)) => match serde_json::from_str(&value) {
                Ok(entity) => return Ok(entity),
                Err(e) => {
                    tracing::warn!("Discarding unreadable cache entry {}: {}", Self::key(id), e);
                }
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("Cache read failed for {}: {}", Self::key(id), e),
        }
        self.refresh(id).await
    }

    /// Like [`get`](Self::get) but maps a missing entity to `None`.
    pub async fn find(&self, id: &str) -> Result<Option<T>> {
        match self.get(id).await {
            Ok(entity) => Ok(Some(entity)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn set(&self, entity: &T) {
        let key = Self::key(entity.id());
        let value = match serde_json::to_string(entity) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize {} for cache: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.kv.set(&key, &value).await {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    pub async fn delete(&self, id: &str) {
        if let Err(e) = self.kv.delete(&Self::key(id)).await {
            tracing::warn!("Cache delete failed for {}: {}", Self::key(id), e);
        }
    }

    /// Reloads from the store and repopulates the cache. A missing entity
    /// is evicted and reported as not found.
    pub async fn refresh(&self, id: &str) -> Result<T> {
        match T::load(self.store.as_ref(), id)? {
            Some(entity) => {
                self.set(&entity).await;
                Ok(entity)
            }
            None => {
                self.delete(id).await;
                Err(Error::NotFound(T::ENTITY))
            }
        }
    }

    /// Refreshes each id, ignoring ones that no longer exist.
    pub async fn refresh_many(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            match self.refresh(id).await {
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// One entity cache per cached kind, sharing a backend.
#[derive(Clone)]
pub struct Caches {
    pub file: EntityCache<File>,
    pub workspace: EntityCache<Workspace>,
    pub organization: EntityCache<Organization>,
    pub group: EntityCache<Group>,
    pub snapshot: EntityCache<Snapshot>,
    pub task: EntityCache<Task>,
}

impl Caches {
    pub fn new(kv: Arc<dyn KvCache>, store: Arc<dyn Store>) -> Self {
        Self {
            file: EntityCache::new(kv.clone(), store.clone()),
            workspace: EntityCache::new(kv.clone(), store.clone()),
            organization: EntityCache::new(kv.clone(), store.clone()),
            group: EntityCache::new(kv.clone(), store.clone()),
            snapshot: EntityCache::new(kv.clone(), store.clone()),
            task: EntityCache::new(kv, store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::SqliteStore;
    use crate::types::{TaskStatus, Task};
    use chrono::Utc;

    fn setup() -> (Arc<MemoryCache>, Arc<SqliteStore>, EntityCache<Task>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.initialize().unwrap();
        store
            .create_user(&crate::types::User {
                id: "u1".into(),
                full_name: "U".into(),
                username: "u1".into(),
                email: "u1@example.com".into(),
                picture: None,
                email_confirmed: true,
                password_hash: String::new(),
                create_time: Utc::now(),
                update_time: None,
            })
            .unwrap();
        let kv = Arc::new(MemoryCache::new());
        let cache = EntityCache::new(kv.clone(), store.clone());
        (kv, store, cache)
    }

    fn task() -> Task {
        Task {
            id: "t1".into(),
            name: "Waiting.".into(),
            error: None,
            percentage: None,
            is_indeterminate: true,
            user_id: "u1".into(),
            status: TaskStatus::Waiting,
            payload: None,
            cancelled: false,
            create_time: Utc::now(),
            update_time: None,
        }
    }

    #[tokio::test]
    async fn test_miss_loads_from_store() {
        let (kv, store, cache) = setup();
        store.create_task(&task()).unwrap();

        let loaded = cache.get("t1").await.unwrap();
        assert_eq!(loaded.name, "Waiting.");
        assert!(kv.get("task:t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_does_not_touch_store() {
        let (_kv, store, cache) = setup();
        let mut t = task();
        store.create_task(&t).unwrap();
        cache.get("t1").await.unwrap();

        t.name = "Changed.".into();
        store.save_task(&t).unwrap();
        assert_eq!(cache.get("t1").await.unwrap().name, "Waiting.");
        assert_eq!(cache.refresh("t1").await.unwrap().name, "Changed.");
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let (kv, _store, cache) = setup();
        kv.set("task:gone", "{\"broken\":true}").await.unwrap();
        let err = cache.get("gone").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(Entity::Task)));
        assert!(kv.get("task:gone").await.unwrap().is_none());
        assert!(cache.find("gone").await.unwrap().is_none());
    }
}
