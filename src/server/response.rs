use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Error envelope shared by every HTTP surface:
/// `{code, status, message, userMessage, moreInfo}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: String,
    pub status: u16,
    pub message: String,
    pub user_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub more_info: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: code.into(),
            status: status.as_u16(),
            user_message: message.clone(),
            message,
            more_info: String::new(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = err.status();
        if status >= 500 {
            tracing::error!("{err}");
        }
        Self {
            code: err.code(),
            status,
            message: err.to_string(),
            user_message: err.user_message(),
            more_info: String::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Entity;

    #[test]
    fn test_error_envelope() {
        let api: ApiError = Error::NotFound(Entity::File).into();
        assert_eq!(api.status, 404);
        assert_eq!(api.code, "file_not_found");

        let json = serde_json::to_value(&api).unwrap();
        assert!(json.get("userMessage").is_some());
        assert!(json.get("user_message").is_none());
    }
}
