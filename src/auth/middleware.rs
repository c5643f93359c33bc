use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::WWW_AUTHENTICATE, request::Parts},
    response::{IntoResponse, Response},
};

use super::helpers::{extract_bearer_token, secrets_match};
use crate::error::Error;
use crate::server::AppState;
use crate::server::response::ApiError;
use crate::types::User;

/// Extractor that requires a valid bearer access token.
pub struct RequireUser {
    pub user: User,
}

/// Extractor for service-to-service routes guarded by `?api_key=`.
pub struct RequireApiKey;

/// State of a surface that serves `?api_key=` routes.
pub trait ApiKeyState: Send + Sync {
    fn api_key(&self) -> &str;
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    InvalidApiKey,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required",
            ),
            AuthError::InvalidScheme => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid authorization scheme",
            ),
            AuthError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or expired token",
            ),
            AuthError::InvalidApiKey => (StatusCode::FORBIDDEN, "invalid_api_key", "Invalid API key"),
            AuthError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_server_error",
                "Internal server error",
            ),
        };

        let mut response = ApiError::new(status, code, message).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"voltcore\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuth)?
            .to_str()
            .map_err(|_| AuthError::InvalidScheme)?;
        let raw_token = extract_bearer_token(header).ok_or(AuthError::InvalidScheme)?;

        let identity = state.identity.clone();
        let user = tokio::task::spawn_blocking(move || identity.authenticate(&raw_token))
            .await
            .map_err(|_| AuthError::InternalError)?
            .map_err(|e| match e {
                Error::Unauthorized => AuthError::InvalidToken,
                e => {
                    tracing::error!("Token validation failed: {e}");
                    AuthError::InternalError
                }
            })?;

        Ok(RequireUser { user })
    }
}

impl<S: ApiKeyState + 'static> FromRequestParts<Arc<S>> for RequireApiKey {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<S>,
    ) -> Result<Self, Self::Rejection> {
        let presented = api_key_from_query(parts.uri.query()).ok_or(AuthError::InvalidApiKey)?;
        let expected = state.api_key();
        if expected.is_empty() || !secrets_match(&presented, expected) {
            return Err(AuthError::InvalidApiKey);
        }
        Ok(RequireApiKey)
    }
}

/// Value of the `api_key` query parameter, percent-decoded.
pub fn api_key_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name != "api_key" {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_from_query() {
        assert_eq!(
            api_key_from_query(Some("a=1&api_key=s%2Fecret")).as_deref(),
            Some("s/ecret")
        );
        assert_eq!(api_key_from_query(Some("key=1")), None);
        assert_eq!(api_key_from_query(None), None);
    }
}
