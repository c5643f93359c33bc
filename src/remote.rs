//! Async JSON client for calls between voltcore services.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Credential {
    ApiKey(String),
    Bearer(String),
    None,
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: String,
    credential: Credential,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    user_message: String,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Remote(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: Credential::None,
        })
    }

    /// Authenticates with `?api_key=` on every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.credential = Credential::ApiKey(api_key.to_string());
        self
    }

    #[must_use]
    pub fn with_bearer(&self, token: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            credential: Credential::Bearer(token.to_string()),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.versioned(method, "v3", path)
    }

    /// Like [`Self::request`] under another API version prefix.
    pub fn versioned(&self, method: Method, version: &str, path: &str) -> RequestBuilder {
        let url = format!("{}/{version}{path}", self.base_url);
        let req = self.client.request(method, url);
        match &self.credential {
            Credential::ApiKey(key) => req.query(&[("api_key", key)]),
            Credential::Bearer(token) => req.bearer_auth(token),
            Credential::None => req,
        }
    }

    pub async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req.send().await.map_err(|e| Error::Remote(e.to_string()))?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body = resp.bytes().await.unwrap_or_default();
        Err(match serde_json::from_slice::<Envelope>(&body) {
            Ok(env) => Error::Api {
                status,
                code: env.code,
                message: env.message,
                user_message: env.user_message,
            },
            Err(_) => Error::Remote(format!(
                "unexpected {status} response: {}",
                String::from_utf8_lossy(&body)
            )),
        })
    }

    pub async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| Error::Remote(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json(self.request(Method::GET, path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.json(self.request(Method::POST, path).json(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.json(self.request(Method::PATCH, path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }
}
