use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::Core;
use crate::error::{Entity, Error, Result};
use crate::search::{GROUP_INDEX, group_document};
use crate::store::path::validate_name;
use crate::types::{Group, PermissionLevel, User};

#[derive(Clone)]
pub struct GroupService {
    core: Arc<Core>,
}

impl GroupService {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    async fn authorized(&self, id: &str, user_id: &str, level: PermissionLevel) -> Result<Group> {
        let group = self.core.caches.group.get(id).await?;
        self.core.guard.authorize(user_id, &group, level).await?;
        Ok(group)
    }

    async fn sync(&self, id: &str) -> Result<Group> {
        let group = self.core.caches.group.refresh(id).await?;
        self.core
            .index(GROUP_INDEX, vec![group_document(&group)])
            .await;
        Ok(group)
    }

    pub async fn create(&self, name: &str, organization_id: &str, user_id: &str) -> Result<Group> {
        let org = self.core.caches.organization.get(organization_id).await?;
        self.core
            .guard
            .authorize(user_id, &org, PermissionLevel::Editor)
            .await?;

        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: validate_name(name)?,
            organization_id: org.id.clone(),
            user_permissions: Vec::new(),
            group_permissions: Vec::new(),
            members: Vec::new(),
            create_time: Utc::now(),
            update_time: None,
        };
        self.core.store.create_group(&group)?;
        self.core
            .store
            .grant_user_permission(&group.id, user_id, PermissionLevel::Owner)?;
        self.core.store.add_group_member(&group.id, user_id)?;

        let group = self.sync(&group.id).await?;
        tracing::info!("Created group {} ({}) in {}", group.name, group.id, org.id);
        Ok(group)
    }

    pub async fn find(&self, id: &str, user_id: &str) -> Result<Group> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await
    }

    /// Groups the user can view, optionally limited to one organization.
    pub async fn list(&self, organization_id: Option<&str>, user_id: &str) -> Result<Vec<Group>> {
        let groups = match organization_id {
            Some(org_id) => {
                let org = self.core.caches.organization.get(org_id).await?;
                self.core
                    .guard
                    .authorize(user_id, &org, PermissionLevel::Viewer)
                    .await?;
                self.core.store.list_groups_for_organization(org_id)?
            }
            None => self.core.store.list_groups_for_user(user_id)?,
        };
        self.core
            .guard
            .filter(user_id, groups, PermissionLevel::Viewer)
            .await
    }

    pub async fn patch_name(&self, id: &str, name: &str, user_id: &str) -> Result<Group> {
        let group = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        self.core
            .store
            .update_group_name(&group.id, &validate_name(name)?)?;
        self.sync(&group.id).await
    }

    pub async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let group = self.authorized(id, user_id, PermissionLevel::Owner).await?;
        self.core.store.delete_group(&group.id)?;
        self.core.caches.group.delete(&group.id).await;
        self.core
            .unindex(GROUP_INDEX, std::slice::from_ref(&group.id))
            .await;
        tracing::info!("Deleted group {} ({})", group.name, group.id);
        Ok(())
    }

    pub async fn members(&self, id: &str, user_id: &str) -> Result<Vec<User>> {
        let group = self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        self.core.store.list_group_members(&group.id)
    }

    /// The member must already belong to the group's organization.
    pub async fn add_member(&self, id: &str, member_id: &str, user_id: &str) -> Result<Group> {
        let group = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        let org = self.core.caches.organization.get(&group.organization_id).await?;
        if !org.members.iter().any(|m| m == member_id) {
            return Err(Error::bad_request(
                "user_not_member_of_organization",
                "the user is not a member of the organization",
            ));
        }
        self.core.store.add_group_member(&group.id, member_id)?;
        self.sync(&group.id).await
    }

    pub async fn remove_member(&self, id: &str, member_id: &str, user_id: &str) -> Result<Group> {
        let group = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        if !group.members.iter().any(|m| m == member_id) {
            return Err(Error::NotFound(Entity::User));
        }
        self.core.store.remove_group_member(&group.id, member_id)?;
        self.sync(&group.id).await
    }
}
