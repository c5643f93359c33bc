use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::Core;
use crate::error::{Entity, Error, Result};
use crate::types::{Invitation, InvitationStatus, PermissionLevel, User};

#[derive(Clone)]
pub struct InvitationService {
    core: Arc<Core>,
}

fn ensure_pending(invitation: &Invitation, code: &'static str) -> Result<()> {
    if invitation.status != InvitationStatus::Pending {
        return Err(Error::forbidden(
            code,
            format!("invitation is already {}", invitation.status.as_str()),
        ));
    }
    Ok(())
}

impl InvitationService {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    fn get(&self, id: &str) -> Result<Invitation> {
        self.core
            .store
            .get_invitation(id)?
            .ok_or(Error::NotFound(Entity::Invitation))
    }

    /// Invites each address once. Existing members are skipped.
    pub async fn create(&self, organization_id: &str, emails: &[String], user_id: &str) -> Result<Vec<Invitation>> {
        let org = self.core.caches.organization.get(organization_id).await?;
        self.core
            .guard
            .authorize(user_id, &org, PermissionLevel::Owner)
            .await?;

        let members: BTreeSet<String> = self
            .core
            .store
            .list_organization_members(&org.id)?
            .into_iter()
            .map(|u| u.email.to_lowercase())
            .collect();
        let emails: BTreeSet<String> = emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let mut created = Vec::new();
        for email in emails {
            if !email.contains('@') {
                return Err(Error::bad_request(
                    "invalid_email",
                    format!("'{email}' is not an email address"),
                ));
            }
            if members.contains(&email) {
                tracing::debug!("Skipping invitation of existing member {}", email);
                continue;
            }
            let invitation = Invitation {
                id: Uuid::new_v4().to_string(),
                organization_id: org.id.clone(),
                owner_id: user_id.to_string(),
                email,
                status: InvitationStatus::Pending,
                create_time: Utc::now(),
                update_time: None,
            };
            self.core.store.create_invitation(&invitation)?;
            tracing::info!(
                "Invitation {} to {} for organization {} is ready for delivery",
                invitation.id,
                invitation.email,
                org.id
            );
            created.push(invitation);
        }
        Ok(created)
    }

    pub fn incoming(&self, user: &User) -> Result<Vec<Invitation>> {
        self.core.store.list_incoming_invitations(&user.email)
    }

    pub async fn outgoing(&self, organization_id: &str, user_id: &str) -> Result<Vec<Invitation>> {
        let org = self.core.caches.organization.get(organization_id).await?;
        self.core
            .guard
            .authorize(user_id, &org, PermissionLevel::Viewer)
            .await?;
        self.core
            .store
            .list_outgoing_invitations(&org.id, user_id)
    }

    fn ensure_invitee(invitation: &Invitation, user: &User, code: &'static str) -> Result<()> {
        if !invitation.email.eq_ignore_ascii_case(&user.email) {
            return Err(Error::forbidden(code, "the invitation was sent to someone else"));
        }
        Ok(())
    }

    /// Joins the invitee to the organization with viewer.
    pub async fn accept(&self, id: &str, user: &User) -> Result<()> {
        let invitation = self.get(id)?;
        Self::ensure_invitee(&invitation, user, "user_not_allowed_to_accept_invitation")?;
        ensure_pending(&invitation, "cannot_accept_non_pending_invitation")?;

        self.core
            .store
            .add_organization_member(&invitation.organization_id, &user.id)?;
        let current = self
            .core
            .store
            .list_user_permissions(&invitation.organization_id)?
            .into_iter()
            .find(|p| p.user_id == user.id);
        if current.is_none() {
            self.core.store.grant_user_permission(
                &invitation.organization_id,
                &user.id,
                PermissionLevel::Viewer,
            )?;
        }
        self.core
            .store
            .update_invitation_status(&invitation.id, InvitationStatus::Accepted)?;
        self.core
            .caches
            .organization
            .refresh(&invitation.organization_id)
            .await?;

        tracing::info!(
            "{} joined organization {}",
            user.id,
            invitation.organization_id
        );
        Ok(())
    }

    pub fn decline(&self, id: &str, user: &User) -> Result<()> {
        let invitation = self.get(id)?;
        Self::ensure_invitee(&invitation, user, "user_not_allowed_to_decline_invitation")?;
        ensure_pending(&invitation, "cannot_decline_non_pending_invitation")?;
        self.core
            .store
            .update_invitation_status(&invitation.id, InvitationStatus::Declined)
    }

    pub async fn resend(&self, id: &str, user_id: &str) -> Result<Invitation> {
        let invitation = self.get(id)?;
        let org = self
            .core
            .caches
            .organization
            .get(&invitation.organization_id)
            .await?;
        self.core
            .guard
            .authorize(user_id, &org, PermissionLevel::Owner)
            .await?;
        ensure_pending(&invitation, "cannot_resend_non_pending_invitation")?;
        tracing::info!(
            "Invitation {} to {} is ready for delivery again",
            invitation.id,
            invitation.email
        );
        Ok(invitation)
    }

    pub fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let invitation = self.get(id)?;
        if invitation.owner_id != user_id {
            return Err(Error::forbidden(
                "user_not_allowed_to_delete_invitation",
                "only the sender can delete an invitation",
            ));
        }
        self.core.store.delete_invitation(&invitation.id)?;
        Ok(())
    }
}
