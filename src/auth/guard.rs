use crate::cache::{Cacheable, Caches};
use crate::error::{Error, Result};
use crate::types::{Guarded, PermissionLevel};

/// Resolves a user's effective level on a resource from its direct and
/// group grants.
#[derive(Clone)]
pub struct Guard {
    caches: Caches,
}

impl Guard {
    pub fn new(caches: Caches) -> Self {
        Self { caches }
    }

    /// Highest level held by `user_id`, directly or through a group.
    pub async fn effective_level<R: Guarded>(
        &self,
        user_id: &str,
        resource: &R,
    ) -> Result<Option<PermissionLevel>> {
        let mut level = resource
            .user_permissions()
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.permission)
            .max();

        for grant in resource.group_permissions() {
            if level.is_some_and(|l| l >= grant.permission) {
                continue;
            }
            let Some(group) = self.caches.group.find(&grant.group_id).await? else {
                continue;
            };
            if group.members.iter().any(|m| m == user_id) {
                level = Some(grant.permission);
            }
        }

        Ok(level)
    }

    /// Fails with `NotFound` when the user cannot even view the resource and
    /// with `MissingPermission` when they can view it but lack `required`.
    pub async fn authorize<R: Guarded + Cacheable>(
        &self,
        user_id: &str,
        resource: &R,
        required: PermissionLevel,
    ) -> Result<()> {
        match self.effective_level(user_id, resource).await? {
            None => Err(Error::NotFound(R::ENTITY)),
            Some(level) if level.satisfies(required) => Ok(()),
            Some(_) => Err(Error::MissingPermission(R::ENTITY, required)),
        }
    }

    pub async fn is_authorized<R: Guarded + Cacheable>(
        &self,
        user_id: &str,
        resource: &R,
        required: PermissionLevel,
    ) -> Result<bool> {
        match self.authorize(user_id, resource, required).await {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_) | Error::MissingPermission(..)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Keeps the resources the user holds at least `required` on.
    pub async fn filter<R: Guarded + Cacheable>(
        &self,
        user_id: &str,
        resources: Vec<R>,
        required: PermissionLevel,
    ) -> Result<Vec<R>> {
        let mut allowed = Vec::with_capacity(resources.len());
        for resource in resources {
            if self.is_authorized(user_id, &resource, required).await? {
                allowed.push(resource);
            }
        }
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::Entity;
    use crate::store::{SqliteStore, Store};
    use crate::types::{Group, GroupPermission, Organization, User, UserPermission};

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            full_name: id.into(),
            username: id.into(),
            email: format!("{id}@example.com"),
            picture: None,
            email_confirmed: true,
            password_hash: String::new(),
            create_time: Utc::now(),
            update_time: None,
        }
    }

    fn org(user_permissions: Vec<UserPermission>, group_permissions: Vec<GroupPermission>) -> Organization {
        Organization {
            id: "o1".into(),
            name: "Org".into(),
            user_permissions,
            group_permissions,
            members: vec![],
            create_time: Utc::now(),
            update_time: None,
        }
    }

    fn guard() -> (Arc<SqliteStore>, Guard) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.initialize().unwrap();
        for id in ["u1", "u2", "u3"] {
            store.create_user(&user(id)).unwrap();
        }
        store.create_organization(&org(vec![], vec![])).unwrap();
        store
            .create_group(&Group {
                id: "g1".into(),
                name: "Team".into(),
                organization_id: "o1".into(),
                user_permissions: vec![],
                group_permissions: vec![],
                members: vec![],
                create_time: Utc::now(),
                update_time: None,
            })
            .unwrap();
        store.add_group_member("g1", "u2").unwrap();
        let caches = Caches::new(Arc::new(MemoryCache::new()), store.clone());
        (store, Guard::new(caches))
    }

    #[tokio::test]
    async fn test_direct_grant() {
        let (_store, guard) = guard();
        let o = org(
            vec![UserPermission {
                user_id: "u1".into(),
                permission: PermissionLevel::Editor,
            }],
            vec![],
        );
        guard.authorize("u1", &o, PermissionLevel::Viewer).await.unwrap();
        guard.authorize("u1", &o, PermissionLevel::Editor).await.unwrap();
        let err = guard
            .authorize("u1", &o, PermissionLevel::Owner)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingPermission(Entity::Organization, PermissionLevel::Owner)
        ));
    }

    #[tokio::test]
    async fn test_no_grant_masks_existence() {
        let (_store, guard) = guard();
        let o = org(vec![], vec![]);
        for level in PermissionLevel::ALL {
            let err = guard.authorize("u3", &o, level).await.unwrap_err();
            assert!(matches!(err, Error::NotFound(Entity::Organization)));
        }
    }

    #[tokio::test]
    async fn test_group_grant_applies_to_members_only() {
        let (_store, guard) = guard();
        let o = org(
            vec![],
            vec![GroupPermission {
                group_id: "g1".into(),
                permission: PermissionLevel::Owner,
            }],
        );
        guard.authorize("u2", &o, PermissionLevel::Owner).await.unwrap();
        assert!(!guard.is_authorized("u3", &o, PermissionLevel::Viewer).await.unwrap());
    }

    #[tokio::test]
    async fn test_effective_level_takes_max() {
        let (_store, guard) = guard();
        let o = org(
            vec![UserPermission {
                user_id: "u2".into(),
                permission: PermissionLevel::Viewer,
            }],
            vec![GroupPermission {
                group_id: "g1".into(),
                permission: PermissionLevel::Editor,
            }],
        );
        assert_eq!(
            guard.effective_level("u2", &o).await.unwrap(),
            Some(PermissionLevel::Editor)
        );
    }
}
