//! The management API driven through its router with in-process services.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::{Fixture, PASSWORD};
use serde_json::{Value, json};
use tower::ServiceExt;

use voltcore::conversion::SchedulerOptions;
use voltcore::server::{AppState, create_router};
use voltcore::types::PipelineId;

const API_KEY: &str = "test-api-key";

struct Api {
    fx: Fixture,
    router: Router,
}

impl Api {
    fn new() -> Self {
        let fx = Fixture::new();
        let mut state = AppState::new(fx.services.clone(), fx.identity.clone(), API_KEY);
        state.temp_dir = Some(fx.temp_dir.path().to_path_buf());
        let router = create_router(Arc::new(state));
        Self { fx, router }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(
                String::from_utf8_lossy(&body).into_owned(),
            ))
        };
        (status, value)
    }

    async fn login(&self, username: &str) -> String {
        let request = Request::post("/v3/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "grant_type=password&username={username}&password={}",
                urlencoding::encode(PASSWORD)
            )))
            .unwrap();
        let (status, body) = self.send(request).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn call(&self, method: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    /// Creates an organization and a workspace through the API, returning the
    /// workspace JSON.
    async fn workspace(&self, token: &str, name: &str) -> Value {
        let (status, org) = self
            .call("POST", "/v3/organizations", token, Some(json!({"name": format!("{name} org")})))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{org}");
        let (status, workspace) = self
            .call(
                "POST",
                "/v3/workspaces",
                token,
                Some(json!({"name": name, "organization_id": org["id"]})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{workspace}");
        workspace
    }
}

#[tokio::test]
async fn test_health() {
    let api = Api::new();
    let (status, body) = api
        .send(Request::get("/v3/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_password_grant_and_me() {
    let api = Api::new();
    api.fx.user("u1");
    let token = api.login("u1").await;

    let (status, me) = api.call("GET", "/v3/users/me", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "u1");
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn test_wrong_password_and_unknown_grant() {
    let api = Api::new();
    api.fx.user("u1");

    let request = Request::post("/v3/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("grant_type=password&username=u1&password=nope"))
        .unwrap();
    let (status, body) = api.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_grant");

    let request = Request::post("/v3/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("grant_type=client_credentials"))
        .unwrap();
    let (status, body) = api.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_missing_bearer_token_uses_error_envelope() {
    let api = Api::new();
    let (status, body) = api
        .send(Request::get("/v3/workspaces").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["status"], 401);
    assert!(body["message"].is_string());
    assert!(body["userMessage"].is_string());

    let (status, _) = api.call("GET", "/v3/workspaces", "not-a-token", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_workspace_and_folder_lifecycle() {
    let api = Api::new();
    api.fx.user("u1");
    let token = api.login("u1").await;
    let workspace = api.workspace(&token, "W1").await;

    let (status, workspaces) = api.call("GET", "/v3/workspaces", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workspaces.as_array().unwrap().len(), 1);

    let (status, folder) = api
        .call(
            "POST",
            "/v3/files",
            &token,
            Some(json!({"workspace_id": workspace["id"], "name": "docs", "type": "folder"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{folder}");
    assert_eq!(folder["parent_id"], workspace["root_id"]);

    let (status, found) = api.call("GET", "/v3/files/get?path=/W1/docs", &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], folder["id"]);

    let uri = format!("/v3/files/{}/list", workspace["root_id"].as_str().unwrap());
    let (status, page) = api.call("GET", &uri, &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_elements"], 1);
    assert_eq!(page["data"][0]["name"], "docs");

    let (status, _) = api
        .call(
            "POST",
            "/v3/files",
            &token,
            Some(json!({"workspace_id": workspace["id"], "name": "Docs", "type": "folder"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_strangers_see_not_found() {
    let api = Api::new();
    api.fx.user("u1");
    api.fx.user("u2");
    let owner = api.login("u1").await;
    let stranger = api.login("u2").await;
    let workspace = api.workspace(&owner, "W1").await;

    let uri = format!("/v3/workspaces/{}", workspace["id"].as_str().unwrap());
    let (status, body) = api.call("GET", &uri, &stranger, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "workspace_not_found");
}

#[tokio::test]
async fn test_multipart_upload_launches_pipeline() {
    let api = Api::new();
    api.fx.user("u1");
    let token = api.login("u1").await;
    let workspace = api.workspace(&token, "W1").await;

    let body = "--XBOUNDARY\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        hello\r\n\
        --XBOUNDARY--\r\n";
    let request = Request::post(format!(
        "/v3/files/upload?workspace_id={}",
        workspace["id"].as_str().unwrap()
    ))
    .header(header::AUTHORIZATION, format!("Bearer {token}"))
    .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
    .body(Body::from(body))
    .unwrap();
    let (status, file) = api.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{file}");
    assert_eq!(file["name"], "a.txt");
    assert_eq!(file["snapshot"]["version"], 1);
    assert_eq!(file["snapshot"]["status"], "waiting");

    let run = api.fx.launcher.last();
    assert_eq!(Some(run.snapshot_id.as_str()), file["snapshot_id"].as_str());
}

#[tokio::test]
async fn test_run_named_pipeline() {
    let api = Api::new();
    let u1 = api.fx.user("u1");
    let token = api.login("u1").await;
    let w1 = api.fx.workspace(&u1, "W1", 1_000_000).await;
    let file = api.fx.upload(&w1, &w1.root_id, "scan.pdf", b"%PDF", &u1).await;
    let uri = |query: &str| {
        format!(
            "/v3/snapshots/{}/pipelines/ocr{query}",
            file.snapshot_id.as_deref().unwrap()
        )
    };

    let (status, body) = api.call("POST", &uri("?language=eng"), &token, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "snapshot_is_processing");

    api.fx.convert_last(PipelineId::Noop, SchedulerOptions::default()).await;

    let (status, body) = api.call("POST", &uri(""), &token, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "language_is_undefined");

    let (status, body) = api.call("POST", &uri("?language=eng"), &token, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["task_id"].is_string());
    let run = api.fx.launcher.last();
    assert_eq!(run.pipeline_id, Some(PipelineId::Ocr));
    assert_eq!(run.payload.unwrap()["language"], "eng");
}

#[tokio::test]
async fn test_api_key_routes() {
    let api = Api::new();
    let u1 = api.fx.user("u1");
    let task = json!({"user_id": u1.id, "name": "Upload"});

    let request = |uri: &str| {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(task.to_string()))
            .unwrap()
    };
    let (status, body) = api.send(request("/v3/tasks")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "invalid_api_key");

    let (status, _) = api.send(request("/v3/tasks?api_key=wrong")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = api.send(request(&format!("/v3/tasks?api_key={API_KEY}"))).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["name"], "Upload");
    assert_eq!(created["status"], "waiting");
}
