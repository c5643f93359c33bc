use std::io::SeekFrom;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use super::router::WebDavState;
use super::xml::{MULTISTATUS_CONTENT_TYPE, PropEntry, http_date, multistatus};
use crate::auth::helpers::extract_basic_credentials;
use crate::error::{Entity, Error, Result};
use crate::service::FileView;
use crate::storage::{ByteRange, DEFAULT_CONTENT_TYPE};
use crate::types::S3Reference;

pub const ALLOWED_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE, PROPFIND, PROPPATCH";

/// Longest error message sent back to clients.
const MAX_ERROR_MESSAGE: usize = 256;

/// Per-request context: the decoded path and the caller's access token.
struct DavRequest {
    path: String,
    token: String,
}

/// Entry point for every WebDAV method.
pub async fn dispatch(State(state): State<Arc<WebDavState>>, request: Request) -> Response {
    let method = request.method().clone();
    if method == Method::OPTIONS {
        return options();
    }

    let dav = match authenticate(&state, request.headers(), request.uri()).await {
        Ok(dav) => dav,
        Err(response) => return response,
    };

    let result = match method.as_str() {
        "GET" => get(&state, &dav, request.headers(), false).await,
        "HEAD" => get(&state, &dav, request.headers(), true).await,
        "PUT" => put(&state, &dav, request).await,
        "DELETE" => delete(&state, &dav).await,
        "MKCOL" => mkcol(&state, &dav).await,
        "COPY" => copy(&state, &dav, request.headers()).await,
        "MOVE" => move_to(&state, &dav, request.headers()).await,
        "PROPFIND" => propfind(&state, &dav, request.headers()).await,
        "PROPPATCH" => Ok(StatusCode::NOT_IMPLEMENTED.into_response()),
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    };

    result.unwrap_or_else(|e| error_response(&e))
}

fn options() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ALLOW, ALLOWED_METHODS)
        .header("DAV", "1")
        .header("MS-Author-Via", "DAV")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn authenticate(
    state: &WebDavState,
    headers: &HeaderMap,
    uri: &Uri,
) -> std::result::Result<DavRequest, Response> {
    let credentials = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_basic_credentials);
    let Some((username, password)) = credentials else {
        return Err(unauthorized());
    };

    let token = match state.keeper.access_token(&username, &password).await {
        Ok(token) => token,
        Err(e) if matches!(e.status(), 400 | 401) => {
            tracing::debug!("WebDAV login failed for {}: {}", username, e);
            return Err(unauthorized());
        }
        Err(e) => return Err(error_response(&e)),
    };

    let path = decode_path(uri.path()).map_err(|e| error_response(&e))?;
    Ok(DavRequest { path, token })
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"WebDAV\"")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response())
}

/// Maps core errors onto the status codes WebDAV clients act upon.
fn error_response(err: &Error) -> Response {
    let status = match err.status() {
        401 => StatusCode::UNAUTHORIZED,
        403 => StatusCode::FORBIDDEN,
        404 => StatusCode::NOT_FOUND,
        400 => StatusCode::BAD_REQUEST,
        409 => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::UNAUTHORIZED {
        return unauthorized();
    }
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("WebDAV request failed: {err}");
    }
    (status, truncate(&err.to_string(), MAX_ERROR_MESSAGE)).into_response()
}

fn truncate(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

/// Percent-decodes a request path and drops empty segments.
pub fn decode_path(raw: &str) -> Result<String> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| Error::bad_request("invalid_path", "path is not valid UTF-8"))?;
    let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty()).collect();
    Ok(format!("/{}", segments.join("/")))
}

/// Path of a `Destination` header, which may be an absolute URL.
pub fn destination_path(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get("Destination")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::bad_request("missing_destination", "Destination header is required"))?;
    let path = match value.find("://") {
        Some(idx) => {
            let rest = &value[idx + 3..];
            rest.find('/').map_or("/", |slash| &rest[slash..])
        }
        None => value,
    };
    decode_path(path)
}

/// `/a/b/c` -> (`/a/b`, `c`). The parent of a top level entry is `/`.
pub fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((parent, leaf)) if !parent.is_empty() => (parent.to_string(), leaf.to_string()),
        Some((_, leaf)) => ("/".to_string(), leaf.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

/// Lock files written next to documents by office suites.
pub fn is_lock_file(name: &str) -> bool {
    name.starts_with("~$") || (name.starts_with(".~lock.") && name.ends_with('#'))
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

async fn get(
    state: &WebDavState,
    dav: &DavRequest,
    headers: &HeaderMap,
    head_only: bool,
) -> Result<Response> {
    let view = state.backend.find_by_path(&dav.token, &dav.path).await?;
    if view.file.is_folder() {
        return Err(Error::bad_request("file_is_a_folder", "folders have no contents"));
    }
    let original = view
        .snapshot
        .as_ref()
        .and_then(|s| s.original.as_ref())
        .ok_or_else(|| Error::NotFound(Entity::Snapshot))?;

    let info = state
        .objects
        .stat_object(&original.bucket, &original.key)
        .await?;
    let total = u64::try_from(info.size).unwrap_or_default();
    let content_type = info
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let modified = view.file.update_time.unwrap_or(view.file.create_time);

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => match ByteRange::parse(value, total) {
            Some(range) => Some(range),
            None => {
                return Ok(Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{total}"))
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()));
            }
        },
        None => None,
    };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::LAST_MODIFIED, http_date(modified));
    builder = match range {
        Some(range) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_LENGTH, range.len())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{total}", range.start, range.end),
            ),
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total),
    };

    if head_only {
        return Ok(builder
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()));
    }

    let temp = tempfile_in(state)?;
    state
        .objects
        .fget_object(&original.bucket, &original.key, temp.path())
        .await?;
    let mut file = tokio::fs::File::open(temp.path()).await?;
    // The open handle keeps the contents readable once the path is gone.
    drop(temp);

    let body = match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            Body::from_stream(ReaderStream::new(file.take(range.len())))
        }
        None => Body::from_stream(ReaderStream::new(file)),
    };
    Ok(builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

fn tempfile_in(state: &WebDavState) -> Result<tempfile::NamedTempFile> {
    let temp = match &state.temp_dir {
        Some(dir) => tempfile::Builder::new().prefix("voltcore-dav-").tempfile_in(dir)?,
        None => tempfile::Builder::new().prefix("voltcore-dav-").tempfile()?,
    };
    Ok(temp)
}

async fn put(state: &WebDavState, dav: &DavRequest, request: Request) -> Result<Response> {
    let (parent_path, name) = split_path(&dav.path);
    if is_lock_file(&name) {
        return Ok(StatusCode::OK.into_response());
    }
    if parent_path == "/" {
        return Err(Error::forbidden(
            "cannot_create_workspace",
            "workspaces cannot be created over WebDAV",
        ));
    }

    let existing = match state.backend.find_by_path(&dav.token, &dav.path).await {
        Ok(view) if view.file.is_folder() => {
            return Err(Error::bad_request("file_is_a_folder", "folders have no contents"));
        }
        Ok(view) => Some(view),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let parent = if existing.is_some() {
        None
    } else {
        Some(state.backend.find_by_path(&dav.token, &parent_path).await?)
    };
    let workspace_id = existing
        .as_ref()
        .or(parent.as_ref())
        .map(|v| v.file.workspace_id.clone())
        .unwrap_or_default();
    let workspace = state.backend.workspace(&dav.token, &workspace_id).await?;

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let temp = tempfile_in(state)?;
    let mut file = tokio::fs::File::create(temp.path()).await?;
    let stream = request
        .into_body()
        .into_data_stream()
        .map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    tokio::io::copy(&mut reader, &mut file).await?;
    file.sync_all().await?;
    drop(file);

    let snapshot_id = Uuid::new_v4().to_string();
    let key = S3Reference::original_key(&snapshot_id, &name);
    let info = state
        .objects
        .fput_object(&workspace.bucket, &key, temp.path(), &content_type)
        .await?;
    let s3ref = S3Reference {
        bucket: workspace.bucket.clone(),
        key: key.clone(),
        size: info.size,
        snapshot_id,
        content_type: Some(content_type),
    };

    let result = match (&existing, &parent) {
        (Some(view), _) => {
            state
                .backend
                .patch_from_s3(&dav.token, &view.file.id, &s3ref)
                .await
        }
        (None, Some(parent)) => {
            state
                .backend
                .create_from_s3(&dav.token, &parent.file, &name, &s3ref)
                .await
        }
        (None, None) => Err(Error::NotFound(Entity::File)),
    };
    match result {
        Ok(file) => {
            tracing::debug!("Stored {} bytes for {} ({})", info.size, dav.path, file.id);
            Ok(StatusCode::CREATED.into_response())
        }
        Err(e) => {
            if let Err(cleanup) = state.objects.remove_object(&workspace.bucket, &key).await {
                tracing::warn!("Failed to remove orphaned object {}: {}", key, cleanup);
            }
            Err(e)
        }
    }
}

async fn delete(state: &WebDavState, dav: &DavRequest) -> Result<Response> {
    let view = state.backend.find_by_path(&dav.token, &dav.path).await?;
    if view.file.is_root() {
        return Err(Error::forbidden(
            "cannot_delete_workspace_root",
            "the root folder of a workspace cannot be deleted",
        ));
    }
    state.backend.delete(&dav.token, &view.file.id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn mkcol(state: &WebDavState, dav: &DavRequest) -> Result<Response> {
    match state.backend.find_by_path(&dav.token, &dav.path).await {
        Ok(_) => return Ok(StatusCode::CREATED.into_response()),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let (parent_path, name) = split_path(&dav.path);
    if parent_path == "/" {
        return Err(Error::forbidden(
            "cannot_create_workspace",
            "workspaces cannot be created over WebDAV",
        ));
    }
    let parent = state.backend.find_by_path(&dav.token, &parent_path).await?;
    match state
        .backend
        .create_folder(&dav.token, &parent.file, &name)
        .await
    {
        Ok(_) => Ok(StatusCode::CREATED.into_response()),
        Err(e) if e.code() == "file_with_similar_name_exists" => {
            Ok(StatusCode::CREATED.into_response())
        }
        Err(e) => Err(e),
    }
}

fn cross_workspace(source: &FileView, target: &FileView) -> Result<()> {
    if source.file.workspace_id != target.file.workspace_id {
        return Err(Error::bad_request(
            "cross_workspace_operation",
            "files cannot be copied or moved across workspaces",
        ));
    }
    Ok(())
}

/// `Overwrite: F` forbids replacing an existing destination.
fn overwrite_allowed(headers: &HeaderMap) -> bool {
    headers
        .get("Overwrite")
        .and_then(|v| v.to_str().ok())
        .is_none_or(|v| !v.trim().eq_ignore_ascii_case("f"))
}

async fn copy(state: &WebDavState, dav: &DavRequest, headers: &HeaderMap) -> Result<Response> {
    let destination = destination_path(headers)?;
    let (target_path, name) = split_path(&destination);

    let source = state.backend.find_by_path(&dav.token, &dav.path).await?;
    let target = state.backend.find_by_path(&dav.token, &target_path).await?;
    cross_workspace(&source, &target)?;

    let existing = match state.backend.find_by_path(&dav.token, &destination).await {
        Ok(view) => Some(view),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    if let Some(existing) = &existing {
        if existing.file.id == source.file.id {
            return Err(Error::forbidden(
                "cannot_copy_onto_itself",
                "source and destination are the same",
            ));
        }
        if !overwrite_allowed(headers) {
            return Ok(StatusCode::PRECONDITION_FAILED.into_response());
        }
        state.backend.delete(&dav.token, &existing.file.id).await?;
    }

    let clone = state
        .backend
        .copy(&dav.token, &source.file.id, &target.file.id)
        .await?;
    if clone.name != name {
        if let Err(e) = state.backend.rename(&dav.token, &clone.id, &name).await {
            if let Err(cleanup) = state.backend.delete(&dav.token, &clone.id).await {
                tracing::warn!("Failed to remove unnamed copy {}: {}", clone.id, cleanup);
            }
            return Err(e);
        }
    }
    let status = if existing.is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    };
    Ok(status.into_response())
}

async fn move_to(state: &WebDavState, dav: &DavRequest, headers: &HeaderMap) -> Result<Response> {
    let destination = destination_path(headers)?;
    let (target_path, name) = split_path(&destination);
    let (source_parent, _) = split_path(&dav.path);

    let source = state.backend.find_by_path(&dav.token, &dav.path).await?;
    if source.file.is_root() {
        return Err(Error::forbidden(
            "cannot_move_workspace_root",
            "the root folder of a workspace cannot be moved",
        ));
    }

    if target_path == source_parent {
        if source.file.name != name {
            state
                .backend
                .rename(&dav.token, &source.file.id, &name)
                .await?;
        }
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let target = state.backend.find_by_path(&dav.token, &target_path).await?;
    cross_workspace(&source, &target)?;
    state
        .backend
        .move_file(&dav.token, &source.file.id, &target.file.id)
        .await?;
    if source.file.name != name {
        state
            .backend
            .rename(&dav.token, &source.file.id, &name)
            .await?;
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn propfind(state: &WebDavState, dav: &DavRequest, headers: &HeaderMap) -> Result<Response> {
    let view = state.backend.find_by_path(&dav.token, &dav.path).await?;
    let mut entries = vec![PropEntry::from_view(&dav.path, &view)];

    let depth_zero = headers
        .get("Depth")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|d| d.trim() == "0");
    if view.file.is_folder() && !depth_zero {
        let children = state.backend.list_by_path(&dav.token, &dav.path).await?;
        for child in &children {
            let path = join_path(&dav.path, &child.file.name);
            entries.push(PropEntry::from_view(&path, child));
        }
    }

    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static(MULTISTATUS_CONTENT_TYPE),
        )
        .body(Body::from(multistatus(&entries)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}
