use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use urlencoding::encode;

use crate::auth::IdentityService;
use crate::error::{Error, Result};
use crate::remote::RemoteClient;
use crate::server::dto::{
    BatchTargetRequest, CreateFromS3Request, IdsRequest, NameRequest, PatchFromS3Request,
};
use crate::service::{BatchResult, CopyManyResult, CreateFileOptions, FileView, Services};
use crate::types::{File, FileType, S3Reference, User, Workspace};

/// The file operations WebDAV needs, performed as the holder of `token`.
#[async_trait]
pub trait DavBackend: Send + Sync {
    async fn find_by_path(&self, token: &str, path: &str) -> Result<FileView>;

    async fn list_by_path(&self, token: &str, path: &str) -> Result<Vec<FileView>>;

    async fn create_folder(&self, token: &str, parent: &File, name: &str) -> Result<File>;

    async fn create_from_s3(
        &self,
        token: &str,
        parent: &File,
        name: &str,
        s3ref: &S3Reference,
    ) -> Result<File>;

    async fn patch_from_s3(&self, token: &str, id: &str, s3ref: &S3Reference) -> Result<File>;

    /// Returns the clone.
    async fn copy(&self, token: &str, source_id: &str, target_id: &str) -> Result<File>;

    async fn move_file(&self, token: &str, source_id: &str, target_id: &str) -> Result<()>;

    async fn rename(&self, token: &str, id: &str, name: &str) -> Result<File>;

    async fn delete(&self, token: &str, id: &str) -> Result<()>;

    async fn workspace(&self, token: &str, id: &str) -> Result<Workspace>;
}

/// Calls the services of this process.
pub struct LocalDavBackend {
    identity: Arc<IdentityService>,
    services: Services,
}

impl LocalDavBackend {
    pub fn new(identity: Arc<IdentityService>, services: Services) -> Self {
        Self { identity, services }
    }

    async fn user(&self, token: &str) -> Result<User> {
        let identity = self.identity.clone();
        let token = token.to_string();
        tokio::task::spawn_blocking(move || identity.authenticate(&token))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}

#[async_trait]
impl DavBackend for LocalDavBackend {
    async fn find_by_path(&self, token: &str, path: &str) -> Result<FileView> {
        let user = self.user(token).await?;
        let file = self.services.files.find_by_path(path, &user.id).await?;
        self.services.files.view(file, &user.id).await
    }

    async fn list_by_path(&self, token: &str, path: &str) -> Result<Vec<FileView>> {
        let user = self.user(token).await?;
        let files = self.services.files.list_by_path(path, &user.id).await?;
        self.services.files.views(files, &user.id).await
    }

    async fn create_folder(&self, token: &str, parent: &File, name: &str) -> Result<File> {
        let user = self.user(token).await?;
        let opts = CreateFileOptions {
            workspace_id: parent.workspace_id.clone(),
            parent_id: Some(parent.id.clone()),
            name: name.to_string(),
            file_type: FileType::Folder,
        };
        self.services.files.create(&opts, &user.id).await
    }

    async fn create_from_s3(
        &self,
        token: &str,
        parent: &File,
        name: &str,
        s3ref: &S3Reference,
    ) -> Result<File> {
        let user = self.user(token).await?;
        let opts = CreateFileOptions {
            workspace_id: parent.workspace_id.clone(),
            parent_id: Some(parent.id.clone()),
            name: name.to_string(),
            file_type: FileType::File,
        };
        self.services
            .files
            .create_from_s3(&opts, s3ref, &user.id)
            .await
    }

    async fn patch_from_s3(&self, token: &str, id: &str, s3ref: &S3Reference) -> Result<File> {
        let user = self.user(token).await?;
        self.services.files.patch_from_s3(id, s3ref, &user.id).await
    }

    async fn copy(&self, token: &str, source_id: &str, target_id: &str) -> Result<File> {
        let user = self.user(token).await?;
        self.services.files.copy(source_id, target_id, &user.id).await
    }

    async fn move_file(&self, token: &str, source_id: &str, target_id: &str) -> Result<()> {
        let user = self.user(token).await?;
        self.services
            .files
            .move_file(source_id, target_id, &user.id)
            .await?;
        Ok(())
    }

    async fn rename(&self, token: &str, id: &str, name: &str) -> Result<File> {
        let user = self.user(token).await?;
        self.services.files.rename(id, name, &user.id).await
    }

    async fn delete(&self, token: &str, id: &str) -> Result<()> {
        let user = self.user(token).await?;
        self.services.files.delete(id, &user.id).await
    }

    async fn workspace(&self, token: &str, id: &str) -> Result<Workspace> {
        let user = self.user(token).await?;
        self.services.workspaces.find(id, &user.id).await
    }
}

/// Calls the core API over HTTP with the user's bearer token.
pub struct HttpDavBackend {
    client: RemoteClient,
}

impl HttpDavBackend {
    pub fn new(api_url: &str) -> Result<Self> {
        Ok(Self {
            client: RemoteClient::new(api_url)?,
        })
    }

    fn as_user(&self, token: &str) -> RemoteClient {
        self.client.with_bearer(token)
    }
}

#[async_trait]
impl DavBackend for HttpDavBackend {
    async fn find_by_path(&self, token: &str, path: &str) -> Result<FileView> {
        self.as_user(token)
            .get(&format!("/files/get?path={}", encode(path)))
            .await
    }

    async fn list_by_path(&self, token: &str, path: &str) -> Result<Vec<FileView>> {
        self.as_user(token)
            .get(&format!("/files/list?path={}", encode(path)))
            .await
    }

    async fn create_folder(&self, token: &str, parent: &File, name: &str) -> Result<File> {
        let opts = CreateFileOptions {
            workspace_id: parent.workspace_id.clone(),
            parent_id: Some(parent.id.clone()),
            name: name.to_string(),
            file_type: FileType::Folder,
        };
        let view: FileView = self.as_user(token).post("/files", &opts).await?;
        Ok(view.file)
    }

    async fn create_from_s3(
        &self,
        token: &str,
        parent: &File,
        name: &str,
        s3ref: &S3Reference,
    ) -> Result<File> {
        let body = CreateFromS3Request {
            workspace_id: parent.workspace_id.clone(),
            parent_id: Some(parent.id.clone()),
            name: name.to_string(),
            s3_reference: s3ref.clone(),
        };
        let view: FileView = self
            .as_user(token)
            .post("/files/create_from_s3", &body)
            .await?;
        Ok(view.file)
    }

    async fn patch_from_s3(&self, token: &str, id: &str, s3ref: &S3Reference) -> Result<File> {
        let body = PatchFromS3Request {
            s3_reference: s3ref.clone(),
        };
        let view: FileView = self
            .as_user(token)
            .patch(&format!("/files/{}/patch_from_s3", encode(id)), &body)
            .await?;
        Ok(view.file)
    }

    async fn copy(&self, token: &str, source_id: &str, target_id: &str) -> Result<File> {
        let client = self.as_user(token);
        let body = BatchTargetRequest {
            source_ids: vec![source_id.to_string()],
            target_id: target_id.to_string(),
        };
        let result: CopyManyResult = client.post("/files/copy", &body).await?;
        let clone_id = result
            .new
            .first()
            .ok_or_else(|| Error::Remote(format!("copy of {source_id} returned no clone")))?;
        let view: FileView = client.get(&format!("/files/{}", encode(clone_id))).await?;
        Ok(view.file)
    }

    async fn move_file(&self, token: &str, source_id: &str, target_id: &str) -> Result<()> {
        let body = BatchTargetRequest {
            source_ids: vec![source_id.to_string()],
            target_id: target_id.to_string(),
        };
        let _: BatchResult = self.as_user(token).post("/files/move", &body).await?;
        Ok(())
    }

    async fn rename(&self, token: &str, id: &str, name: &str) -> Result<File> {
        let body = NameRequest {
            name: name.to_string(),
        };
        let view: FileView = self
            .as_user(token)
            .patch(&format!("/files/{}/name", encode(id)), &body)
            .await?;
        Ok(view.file)
    }

    async fn delete(&self, token: &str, id: &str) -> Result<()> {
        let client = self.as_user(token);
        let body = IdsRequest {
            ids: vec![id.to_string()],
        };
        let req = client.request(Method::DELETE, "/files").json(&body);
        let _: BatchResult = client.json(req).await?;
        Ok(())
    }

    async fn workspace(&self, token: &str, id: &str) -> Result<Workspace> {
        self.as_user(token)
            .get(&format!("/workspaces/{}", encode(id)))
            .await
    }
}
