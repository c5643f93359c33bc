use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{CreateInvitationsRequest, OrganizationQuery};
use crate::server::response::ApiError;
use crate::server::validation::validate_email;

pub async fn create_invitations(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateInvitationsRequest>,
) -> impl IntoResponse {
    for email in &req.emails {
        validate_email(email)?;
    }
    let invitations = state
        .services
        .invitations
        .create(&req.organization_id, &req.emails, &auth.user.id)
        .await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(invitations)))
}

pub async fn list_incoming(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let invitations = state.services.invitations.incoming(&auth.user)?;
    Ok::<_, ApiError>(Json(invitations))
}

pub async fn list_outgoing(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrganizationQuery>,
) -> impl IntoResponse {
    let organization_id = query
        .organization_id
        .ok_or_else(|| Error::bad_request("invalid_request", "organization_id is required"))?;
    let invitations = state
        .services
        .invitations
        .outgoing(&organization_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(invitations))
}

pub async fn accept(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.invitations.accept(&id, &auth.user).await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn decline(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.invitations.decline(&id, &auth.user)?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn resend(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let invitation = state
        .services
        .invitations
        .resend(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(invitation))
}

pub async fn delete_invitation(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.invitations.delete(&id, &auth.user.id)?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
