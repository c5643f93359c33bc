use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{any, get};
use axum::Router;

use super::backend::DavBackend;
use super::handlers::dispatch;
use super::tokens::TokenKeeper;
use crate::server::log_request;
use crate::storage::ObjectStore;

pub struct WebDavState {
    pub backend: Arc<dyn DavBackend>,
    pub keeper: Arc<TokenKeeper>,
    pub objects: Arc<dyn ObjectStore>,
    /// Where uploads and downloads are staged. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

async fn health() -> &'static str {
    "OK"
}

pub fn create_webdav_router(state: Arc<WebDavState>) -> Router {
    Router::new()
        .route("/v3/health", get(health))
        .route("/", any(dispatch))
        .route("/{*path}", any(dispatch))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
