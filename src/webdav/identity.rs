use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;

use crate::auth::{IdentityService, TokenResponse};
use crate::error::{Error, Result};
use crate::remote::RemoteClient;

/// Exchanges credentials for access and refresh tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_password(&self, username: &str, password: &str) -> Result<TokenResponse>;

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// Calls `POST <idp>/v3/token`.
pub struct HttpIdentityProvider {
    client: RemoteClient,
}

impl HttpIdentityProvider {
    pub fn new(idp_url: &str) -> Result<Self> {
        Ok(Self {
            client: RemoteClient::new(idp_url)?,
        })
    }

    async fn grant(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let req = self.client.request(Method::POST, "/token").form(form);
        self.client.json(req).await
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn exchange_password(&self, username: &str, password: &str) -> Result<TokenResponse> {
        self.grant(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

/// Uses the in-process identity service. Hashing runs on the blocking pool.
pub struct LocalIdentityProvider {
    identity: Arc<IdentityService>,
}

impl LocalIdentityProvider {
    pub fn new(identity: Arc<IdentityService>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn exchange_password(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let identity = self.identity.clone();
        let (username, password) = (username.to_string(), password.to_string());
        tokio::task::spawn_blocking(move || identity.exchange_password(&username, &password))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let identity = self.identity.clone();
        let refresh_token = refresh_token.to_string();
        tokio::task::spawn_blocking(move || identity.exchange_refresh_token(&refresh_token))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}
