use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SecretHasher, parse_token};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Token, TokenKind, User};

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;
const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Body of a successful token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default = "bearer")]
    pub token_type: String,
}

fn bearer() -> String {
    "Bearer".to_string()
}

fn invalid_grant(message: &str) -> Error {
    Error::bad_request("invalid_grant", message)
}

/// Password and refresh-token grants, plus access token verification.
pub struct IdentityService {
    store: Arc<dyn Store>,
    hasher: SecretHasher,
    access_ttl: Duration,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>, access_ttl_seconds: i64) -> Self {
        Self {
            store,
            hasher: SecretHasher::new(),
            access_ttl: Duration::seconds(access_ttl_seconds),
        }
    }

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::bad_request(
                "invalid_request",
                "username and password are required",
            ));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            full_name: full_name.trim().to_string(),
            username: username.to_string(),
            email: email.trim().to_lowercase(),
            picture: None,
            email_confirmed: true,
            password_hash: self.hasher.hash(password)?,
            create_time: Utc::now(),
            update_time: None,
        };
        self.store.create_user(&user)?;
        tracing::info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn exchange_password(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let user = match self.store.get_user_by_username(username)? {
            Some(user) => Some(user),
            None => self.store.get_user_by_email(username)?,
        }
        .ok_or_else(|| invalid_grant("invalid username or password"))?;

        if user.password_hash.is_empty() || !self.hasher.verify(password, &user.password_hash)? {
            return Err(invalid_grant("invalid username or password"));
        }

        self.issue(&user.id)
    }

    /// Rotates the refresh token: the presented one is consumed.
    pub fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let token = self
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|_| invalid_grant("invalid refresh token"))?;
        self.store.delete_token(&token.id)?;
        self.issue(&token.user_id)
    }

    /// Resolves the user behind a bearer access token.
    pub fn authenticate(&self, access_token: &str) -> Result<User> {
        let token = self.verify(access_token, TokenKind::Access)?;
        self.store
            .get_user(&token.user_id)?
            .ok_or(Error::Unauthorized)
    }

    fn verify(&self, raw_token: &str, kind: TokenKind) -> Result<Token> {
        let parsed = parse_token(raw_token)?;
        if parsed.kind != kind {
            return Err(Error::Unauthorized);
        }
        let token = self
            .store
            .get_token_by_lookup(&parsed.lookup)?
            .ok_or(Error::Unauthorized)?;

        if token.kind != kind || !self.hasher.verify(raw_token, &token.token_hash)? {
            return Err(Error::Unauthorized);
        }
        if token.expires_at < Utc::now() {
            return Err(Error::Unauthorized);
        }
        Ok(token)
    }

    fn issue(&self, user_id: &str) -> Result<TokenResponse> {
        let now = Utc::now();
        let access_token = self.create_token(user_id, TokenKind::Access, now + self.access_ttl)?;
        let refresh_token = self.create_token(
            user_id,
            TokenKind::Refresh,
            now + Duration::days(REFRESH_TOKEN_TTL_DAYS),
        )?;

        match self.store.delete_expired_tokens() {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Removed {} expired tokens", n),
            Err(e) => tracing::warn!("Failed to remove expired tokens: {e}"),
        }

        Ok(TokenResponse {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
            token_type: bearer(),
        })
    }

    fn create_token(
        &self,
        user_id: &str,
        kind: TokenKind,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<String> {
        let issued = self.hasher.issue(kind)?;
        let token = Token {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            token_hash: issued.hash,
            token_lookup: issued.lookup,
            expires_at,
            create_time: Utc::now(),
        };
        self.store.create_token(&token)?;
        Ok(issued.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn service(ttl: i64) -> IdentityService {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.initialize().unwrap();
        let service = IdentityService::new(store, ttl);
        service
            .create_user("alice", "Alice@Example.com", "Alice", "wonderland")
            .unwrap();
        service
    }

    #[test]
    fn test_password_grant_and_authenticate() {
        let service = service(3600);
        let tokens = service.exchange_password("alice", "wonderland").unwrap();
        assert_eq!(tokens.expires_in, 3600);
        assert_eq!(tokens.token_type, "Bearer");

        let user = service.authenticate(&tokens.access_token).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn test_wrong_password_is_invalid_grant() {
        let service = service(3600);
        let err = service.exchange_password("alice", "nope").unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
        let err = service.exchange_password("bob", "nope").unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[test]
    fn test_refresh_rotates() {
        let service = service(3600);
        let tokens = service.exchange_password("alice", "wonderland").unwrap();
        let next = service.exchange_refresh_token(&tokens.refresh_token).unwrap();
        assert_ne!(next.access_token, tokens.access_token);
        assert!(service.exchange_refresh_token(&tokens.refresh_token).is_err());
        assert!(service.exchange_refresh_token(&next.refresh_token).is_ok());
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let service = service(3600);
        let tokens = service.exchange_password("alice", "wonderland").unwrap();
        assert!(matches!(
            service.authenticate(&tokens.refresh_token),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn test_expired_access_token() {
        let service = service(-1);
        let tokens = service.exchange_password("alice", "wonderland").unwrap();
        assert!(matches!(
            service.authenticate(&tokens.access_token),
            Err(Error::Unauthorized)
        ));
    }
}
