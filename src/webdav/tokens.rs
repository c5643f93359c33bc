use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::identity::IdentityProvider;
use crate::auth::TokenResponse;
use crate::error::Result;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Tokens closer than this to expiry get refreshed.
const REFRESH_MARGIN: chrono::Duration = chrono::Duration::minutes(1);

#[derive(Debug, Clone)]
struct Entry {
    /// Digest of the Basic credentials the tokens were issued for.
    credentials: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn new(credentials: String, tokens: TokenResponse) -> Self {
        Self {
            credentials,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(tokens.expires_in),
        }
    }

    fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < REFRESH_MARGIN
    }
}

fn digest(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Access tokens of WebDAV users, keyed by username.
pub struct TokenKeeper {
    idp: Arc<dyn IdentityProvider>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl TokenKeeper {
    pub fn new(idp: Arc<dyn IdentityProvider>) -> Arc<Self> {
        Arc::new(Self {
            idp,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Access token for a Basic auth pair. The first request of a user, or
    /// one with different credentials, goes to the identity provider.
    pub async fn access_token(&self, username: &str, password: &str) -> Result<String> {
        let credentials = digest(username, password);
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(username) {
                if entry.credentials == credentials && entry.expires_at > Utc::now() {
                    return Ok(entry.access_token.clone());
                }
            }
        }

        let tokens = self.idp.exchange_password(username, password).await?;
        let entry = Entry::new(credentials, tokens);
        let access_token = entry.access_token.clone();
        self.entries
            .lock()
            .await
            .insert(username.to_string(), entry);
        tracing::debug!("Issued WebDAV token for {}", username);
        Ok(access_token)
    }

    /// Refreshes tokens near expiry. Users whose refresh fails are dropped
    /// and must authenticate again.
    pub async fn refresh_expiring(&self) {
        let now = Utc::now();
        let due: Vec<(String, String)> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.is_expiring(now))
            .map(|(username, e)| (username.clone(), e.refresh_token.clone()))
            .collect();

        for (username, refresh_token) in due {
            let result = self.idp.exchange_refresh_token(&refresh_token).await;
            let mut entries = self.entries.lock().await;
            match result {
                Ok(tokens) => {
                    if let Some(entry) = entries.get_mut(&username) {
                        let credentials = std::mem::take(&mut entry.credentials);
                        *entry = Entry::new(credentials, tokens);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh token of {}: {}", username, e);
                    entries.remove(&username);
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub fn spawn_refresher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let keeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                keeper.refresh_expiring().await;
            }
        })
    }
}
