use axum::{Json, response::IntoResponse};

use crate::auth::RequireUser;

pub async fn me(auth: RequireUser) -> impl IntoResponse {
    Json(auth.user)
}
