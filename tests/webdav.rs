//! The WebDAV gateway driven through its router, backed by in-process
//! services and identity.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{Fixture, PASSWORD};
use tower::ServiceExt;

use voltcore::types::User;
use voltcore::webdav::{
    LocalDavBackend, LocalIdentityProvider, TokenKeeper, WebDavState, create_webdav_router,
};

struct Dav {
    fx: Fixture,
    router: Router,
    u1: User,
}

impl Dav {
    async fn new() -> Self {
        let fx = Fixture::new();
        let u1 = fx.user("u1");
        fx.workspace(&u1, "W1", 1_000_000).await;

        std::fs::create_dir_all(fx.temp_dir.path().join("tmp")).expect("create dav temp dir");
        let keeper = TokenKeeper::new(Arc::new(LocalIdentityProvider::new(fx.identity.clone())));
        let state = Arc::new(WebDavState {
            backend: Arc::new(LocalDavBackend::new(
                fx.identity.clone(),
                fx.services.clone(),
            )),
            keeper,
            objects: fx.objects.clone(),
            temp_dir: Some(fx.temp_dir.path().join("tmp")),
        });
        let router = create_webdav_router(state);
        Self { fx, router, u1 }
    }

    fn request(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let credentials = STANDARD.encode(format!("{}:{PASSWORD}", self.u1.username));
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn put(&self, uri: &str, body: &'static [u8]) -> StatusCode {
        let request = self.request("PUT", uri).body(Body::from(body)).unwrap();
        self.send(request).await.status()
    }

    async fn names(&self, path: &str) -> Vec<String> {
        let files = self.fx.services.files.list_by_path(path, &self.u1.id).await.unwrap();
        let mut names: Vec<String> = files.into_iter().map(|file| file.name).collect();
        names.sort();
        names
    }

    async fn get_body(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = self.send(self.request("GET", uri).body(Body::empty()).unwrap()).await;
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }
}

#[tokio::test]
async fn test_options_needs_no_credentials() {
    let dav = Dav::new().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/W1/")
        .body(Body::empty())
        .unwrap();
    let response = dav.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["DAV"], "1");
    assert!(response.headers()[header::ALLOW].to_str().unwrap().contains("PROPFIND"));
}

#[tokio::test]
async fn test_missing_or_bad_credentials_are_challenged() {
    let dav = Dav::new().await;
    let request = Request::get("/W1/").body(Body::empty()).unwrap();
    let response = dav.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let credentials = STANDARD.encode("u1:wrong");
    let request = Request::get("/W1/")
        .header(header::AUTHORIZATION, format!("Basic {credentials}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(dav.send(request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_put_then_get_returns_bytes() {
    let dav = Dav::new().await;
    assert_eq!(dav.put("/W1/a.txt", b"hello").await, StatusCode::CREATED);

    let (status, body) = dav.get_body("/W1/a.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello");

    // A second PUT adds a version to the same file.
    assert_eq!(dav.put("/W1/a.txt", b"hello, world").await, StatusCode::CREATED);
    let (_, body) = dav.get_body("/W1/a.txt").await;
    assert_eq!(body, b"hello, world");
    assert_eq!(dav.fx.launcher.runs().len(), 2);
}

#[tokio::test]
async fn test_move_with_new_leaf_renames() {
    let dav = Dav::new().await;
    dav.put("/W1/a.txt", b"hello").await;
    let before = dav.fx.services.files.find_by_path("/W1/a.txt", &dav.u1.id).await.unwrap();

    let request = dav
        .request("MOVE", "/W1/a.txt")
        .header("Destination", "http://localhost/W1/b.txt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(dav.send(request).await.status(), StatusCode::NO_CONTENT);

    let (status, body) = dav.get_body("/W1/b.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello");
    assert_eq!(dav.get_body("/W1/a.txt").await.0, StatusCode::NOT_FOUND);

    let after = dav.fx.services.files.find_by_path("/W1/b.txt", &dav.u1.id).await.unwrap();
    assert_eq!(after.id, before.id);
}

#[tokio::test]
async fn test_move_into_folder_and_copy() {
    let dav = Dav::new().await;
    dav.put("/W1/a.txt", b"hello").await;
    let mkcol = dav.request("MKCOL", "/W1/docs").body(Body::empty()).unwrap();
    assert_eq!(dav.send(mkcol).await.status(), StatusCode::CREATED);

    let request = dav
        .request("MOVE", "/W1/a.txt")
        .header("Destination", "/W1/docs/c.txt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(dav.send(request).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(dav.get_body("/W1/docs/c.txt").await.1, b"hello");

    let request = dav
        .request("COPY", "/W1/docs/c.txt")
        .header("Destination", "/W1/d.txt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(dav.send(request).await.status(), StatusCode::CREATED);
    assert_eq!(dav.get_body("/W1/d.txt").await.1, b"hello");
    assert_eq!(dav.get_body("/W1/docs/c.txt").await.1, b"hello");
}

#[tokio::test]
async fn test_copy_onto_existing_name() {
    let dav = Dav::new().await;
    dav.put("/W1/a.txt", b"alpha").await;
    dav.put("/W1/b.txt", b"beta").await;
    let copy = |overwrite: &str| {
        dav.request("COPY", "/W1/a.txt")
            .header("Destination", "/W1/b.txt")
            .header("Overwrite", overwrite)
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(dav.send(copy("F")).await.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(dav.get_body("/W1/b.txt").await.1, b"beta");
    assert_eq!(dav.names("/W1").await, ["a.txt", "b.txt"]);

    assert_eq!(dav.send(copy("T")).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(dav.get_body("/W1/b.txt").await.1, b"alpha");
    assert_eq!(dav.get_body("/W1/a.txt").await.1, b"alpha");
    assert_eq!(dav.names("/W1").await, ["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_head_and_get_agree_on_length() {
    let dav = Dav::new().await;
    dav.put("/W1/a.txt", b"hello").await;

    let head = dav.send(dav.request("HEAD", "/W1/a.txt").body(Body::empty()).unwrap()).await;
    let get = dav.send(dav.request("GET", "/W1/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(
        head.headers()[header::CONTENT_LENGTH],
        get.headers()[header::CONTENT_LENGTH]
    );
    assert_eq!(head.headers()[header::CONTENT_LENGTH], "5");
    assert!(head.headers().contains_key(header::LAST_MODIFIED));
    let head_body = to_bytes(head.into_body(), usize::MAX).await.unwrap();
    assert!(head_body.is_empty());
}

#[tokio::test]
async fn test_range_request() {
    let dav = Dav::new().await;
    dav.put("/W1/a.txt", b"hello").await;

    let request = dav
        .request("GET", "/W1/a.txt")
        .header(header::RANGE, "bytes=1-3")
        .body(Body::empty())
        .unwrap();
    let response = dav.send(request).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 1-3/5");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "3");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"ell");

    let request = dav
        .request("GET", "/W1/a.txt")
        .header(header::RANGE, "bytes=9-12")
        .body(Body::empty())
        .unwrap();
    let response = dav.send(request).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */5");
}

#[tokio::test]
async fn test_office_lock_file_is_ignored() {
    let dav = Dav::new().await;
    assert_eq!(dav.put("/W1/~$report.docx", b"lock").await, StatusCode::OK);
    assert_eq!(dav.put("/W1/.~lock.report.odt%23", b"lock").await, StatusCode::OK);

    let listed = dav.fx.services.files.list_by_path("/W1", &dav.u1.id).await.unwrap();
    assert!(listed.is_empty());
    assert!(dav.fx.launcher.runs().is_empty());
}

#[tokio::test]
async fn test_propfind_lists_children() {
    let dav = Dav::new().await;
    dav.put("/W1/a%20b.txt", b"hello").await;
    dav.send(dav.request("MKCOL", "/W1/docs").body(Body::empty()).unwrap()).await;

    let request = dav
        .request("PROPFIND", "/W1/")
        .header("Depth", "1")
        .body(Body::empty())
        .unwrap();
    let response = dav.send(request).await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let body = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec())
        .unwrap();
    assert!(body.contains("<D:href>/W1/</D:href>"));
    assert!(body.contains("<D:href>/W1/a%20b.txt</D:href>"));
    assert!(body.contains("<D:href>/W1/docs/</D:href>"));
    assert!(body.contains("<D:getcontentlength>5</D:getcontentlength>"));

    let request = dav
        .request("PROPFIND", "/W1/")
        .header("Depth", "0")
        .body(Body::empty())
        .unwrap();
    let response = dav.send(request).await;
    let body = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec())
        .unwrap();
    assert!(!body.contains("docs"));
}

#[tokio::test]
async fn test_workspace_level_writes_are_forbidden() {
    let dav = Dav::new().await;
    let mkcol = dav.request("MKCOL", "/W2").body(Body::empty()).unwrap();
    assert_eq!(dav.send(mkcol).await.status(), StatusCode::FORBIDDEN);

    let delete = dav.request("DELETE", "/W1").body(Body::empty()).unwrap();
    assert_eq!(dav.send(delete).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_removes_file() {
    let dav = Dav::new().await;
    dav.put("/W1/a.txt", b"hello").await;

    let delete = dav.request("DELETE", "/W1/a.txt").body(Body::empty()).unwrap();
    assert_eq!(dav.send(delete).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(dav.get_body("/W1/a.txt").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_proppatch_is_not_implemented() {
    let dav = Dav::new().await;
    let request = dav.request("PROPPATCH", "/W1/").body(Body::empty()).unwrap();
    assert_eq!(dav.send(request).await.status(), StatusCode::NOT_IMPLEMENTED);
}
