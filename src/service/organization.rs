use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::Core;
use super::workspace::remove_workspace;
use crate::error::{Entity, Error, Result};
use crate::search::{GROUP_INDEX, ORGANIZATION_INDEX, organization_document};
use crate::store::path::validate_name;
use crate::types::{Group, Organization, PermissionLevel, User};

#[derive(Clone)]
pub struct OrganizationService {
    core: Arc<Core>,
}

impl OrganizationService {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    async fn authorized(&self, id: &str, user_id: &str, level: PermissionLevel) -> Result<Organization> {
        let org = self.core.caches.organization.get(id).await?;
        self.core.guard.authorize(user_id, &org, level).await?;
        Ok(org)
    }

    async fn sync(&self, id: &str) -> Result<Organization> {
        let org = self.core.caches.organization.refresh(id).await?;
        self.core
            .index(ORGANIZATION_INDEX, vec![organization_document(&org)])
            .await;
        Ok(org)
    }

    /// The creator becomes owner and member.
    pub async fn create(&self, name: &str, user_id: &str) -> Result<Organization> {
        let org = Organization {
            id: Uuid::new_v4().to_string(),
            name: validate_name(name)?,
            user_permissions: Vec::new(),
            group_permissions: Vec::new(),
            members: Vec::new(),
            create_time: Utc::now(),
            update_time: None,
        };
        self.core.store.create_organization(&org)?;
        self.core
            .store
            .grant_user_permission(&org.id, user_id, PermissionLevel::Owner)?;
        self.core.store.add_organization_member(&org.id, user_id)?;

        let org = self.sync(&org.id).await?;
        tracing::info!("Created organization {} ({})", org.name, org.id);
        Ok(org)
    }

    pub async fn find(&self, id: &str, user_id: &str) -> Result<Organization> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Organization>> {
        let orgs = self.core.store.list_organizations_for_user(user_id)?;
        self.core
            .guard
            .filter(user_id, orgs, PermissionLevel::Viewer)
            .await
    }

    pub async fn patch_name(&self, id: &str, name: &str, user_id: &str) -> Result<Organization> {
        let org = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        self.core
            .store
            .update_organization_name(&org.id, &validate_name(name)?)?;
        self.sync(&org.id).await
    }

    /// Deletes the organization with its groups and workspaces.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let org = self.authorized(id, user_id, PermissionLevel::Owner).await?;

        for workspace_id in self.core.store.list_workspace_ids_for_organization(&org.id)? {
            if let Some(workspace) = self.core.caches.workspace.find(&workspace_id).await? {
                remove_workspace(&self.core, &workspace).await?;
            }
        }
        let groups = self.core.store.list_groups_for_organization(&org.id)?;
        for group in &groups {
            self.core.store.delete_group(&group.id)?;
            self.core.caches.group.delete(&group.id).await;
        }
        let group_ids: Vec<String> = groups.into_iter().map(|g| g.id).collect();
        self.core.unindex(GROUP_INDEX, &group_ids).await;

        self.core.store.delete_organization(&org.id)?;
        self.core.caches.organization.delete(&org.id).await;
        self.core
            .unindex(ORGANIZATION_INDEX, std::slice::from_ref(&org.id))
            .await;

        tracing::info!("Deleted organization {} ({})", org.name, org.id);
        Ok(())
    }

    pub async fn members(&self, id: &str, user_id: &str) -> Result<Vec<User>> {
        let org = self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        self.core.store.list_organization_members(&org.id)
    }

    pub async fn groups(&self, id: &str, user_id: &str) -> Result<Vec<Group>> {
        let org = self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        let groups = self.core.store.list_groups_for_organization(&org.id)?;
        self.core
            .guard
            .filter(user_id, groups, PermissionLevel::Viewer)
            .await
    }

    fn ensure_not_last_owner(&self, org: &Organization, member_id: &str) -> Result<()> {
        let is_owner = org
            .user_permissions
            .iter()
            .any(|p| p.user_id == member_id && p.permission == PermissionLevel::Owner);
        if is_owner && self.core.store.count_organization_owners(&org.id)? <= 1 {
            return Err(Error::forbidden(
                "cannot_remove_last_owner_of_organization",
                "an organization must keep at least one owner",
            ));
        }
        Ok(())
    }

    /// Removes a member from the organization and from all its groups.
    /// Members may remove themselves; removing others needs editor.
    pub async fn remove_member(&self, id: &str, member_id: &str, user_id: &str) -> Result<()> {
        let required = if member_id == user_id {
            PermissionLevel::Viewer
        } else {
            PermissionLevel::Editor
        };
        let org = self.authorized(id, user_id, required).await?;
        if !org.members.iter().any(|m| m == member_id) {
            return Err(Error::NotFound(Entity::User));
        }
        self.ensure_not_last_owner(&org, member_id)?;

        for group in self.core.store.list_groups_for_organization(&org.id)? {
            if group.members.iter().any(|m| m == member_id) {
                self.core.store.remove_group_member(&group.id, member_id)?;
                self.core.caches.group.refresh(&group.id).await?;
            }
        }
        self.core.store.revoke_user_permission(&org.id, member_id)?;
        self.core.store.remove_organization_member(&org.id, member_id)?;
        self.sync(&org.id).await?;

        tracing::info!("Removed {} from organization {}", member_id, org.id);
        Ok(())
    }

    pub async fn grant_user_permission(
        &self,
        id: &str,
        member_id: &str,
        level: PermissionLevel,
        user_id: &str,
    ) -> Result<Organization> {
        let org = self.authorized(id, user_id, PermissionLevel::Owner).await?;
        if self.core.store.get_user(member_id)?.is_none() {
            return Err(Error::NotFound(Entity::User));
        }
        if level != PermissionLevel::Owner {
            self.ensure_not_last_owner(&org, member_id)?;
        }
        self.core.store.grant_user_permission(&org.id, member_id, level)?;
        self.core.store.add_organization_member(&org.id, member_id)?;
        self.sync(&org.id).await
    }

    pub async fn revoke_user_permission(&self, id: &str, member_id: &str, user_id: &str) -> Result<Organization> {
        let org = self.authorized(id, user_id, PermissionLevel::Owner).await?;
        self.ensure_not_last_owner(&org, member_id)?;
        self.core.store.revoke_user_permission(&org.id, member_id)?;
        self.sync(&org.id).await
    }
}
