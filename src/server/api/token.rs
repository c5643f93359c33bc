use std::sync::Arc;

use axum::{
    Form, Json,
    extract::State,
    response::IntoResponse,
};

use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::TokenRequest;
use crate::server::response::ApiError;

fn missing(field: &str) -> Error {
    Error::bad_request("invalid_request", format!("{field} is required"))
}

/// OAuth2-style password and refresh-token grants.
pub async fn token(
    State(state): State<Arc<AppState>>,
    Form(req): Form<TokenRequest>,
) -> impl IntoResponse {
    let identity = state.identity.clone();
    let tokens = tokio::task::spawn_blocking(move || match req.grant_type.as_str() {
        "password" => {
            let username = req.username.ok_or_else(|| missing("username"))?;
            let password = req.password.ok_or_else(|| missing("password"))?;
            identity.exchange_password(&username, &password)
        }
        "refresh_token" => {
            let refresh_token = req.refresh_token.ok_or_else(|| missing("refresh_token"))?;
            identity.exchange_refresh_token(&refresh_token)
        }
        other => Err(Error::bad_request(
            "unsupported_grant_type",
            format!("grant type '{other}' is not supported"),
        )),
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))??;

    Ok::<_, ApiError>(Json(tokens))
}
