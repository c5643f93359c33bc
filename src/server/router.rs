use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::api::api_router;
use crate::auth::{ApiKeyState, IdentityService};
use crate::service::Services;

pub const DEFAULT_MULTIPART_LIMIT_BYTES: usize = 1000 * 1024 * 1024;

pub struct AppState {
    pub services: Services,
    pub identity: Arc<IdentityService>,
    /// Shared secret of the `?api_key=` routes.
    pub api_key: String,
    pub multipart_limit: usize,
    pub cors_origins: Vec<String>,
    /// Where multipart uploads are staged. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(services: Services, identity: Arc<IdentityService>, api_key: impl Into<String>) -> Self {
        Self {
            services,
            identity,
            api_key: api_key.into(),
            multipart_limit: DEFAULT_MULTIPART_LIMIT_BYTES,
            cors_origins: Vec::new(),
            temp_dir: None,
        }
    }
}

impl ApiKeyState for AppState {
    fn api_key(&self) -> &str {
        &self.api_key
    }
}

async fn health() -> &'static str {
    "OK"
}

pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/v3/health", get(health))
        .nest("/v3", api_router(state.multipart_limit))
        .layer(cors)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
