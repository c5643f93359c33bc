use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{ByteRange, ObjectInfo, ObjectStore, object_not_found};
use crate::error::{Error, Result};

/// S3-compatible object storage (MinIO, AWS, ...).
pub struct S3ObjectStore {
    client: Client,
}

fn s3_error(e: impl std::fmt::Display) -> Error {
    Error::S3(e.to_string())
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

impl S3ObjectStore {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str, region: &str) -> Self {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "static",
            ))
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(s3_error(e))
                }
            }
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        if !self.bucket_exists(bucket).await? {
            return Ok(());
        }
        let keys: Vec<String> = self
            .list_objects(bucket, "", true)
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();
        self.remove_objects(bucket, &keys).await?;
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn fput_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<ObjectInfo> {
        let body = ByteStream::from_path(path).await.map_err(s3_error)?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(s3_error)?;
        self.stat_object(bucket, key).await
    }

    async fn fget_object(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let data = self.get_object(bucket, key, None).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &data).await?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(|r| format!("bytes={}-{}", r.start, r.end)))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    object_not_found(bucket, key)
                } else {
                    s3_error(e)
                }
            })?;

        let data = resp.body.collect().await.map_err(s3_error)?;
        Ok(data.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ObjectInfo> {
        let size = data.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(data.into())
            .send()
            .await
            .map_err(s3_error)?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            content_type: Some(content_type.to_string()),
            last_modified: Some(Utc::now()),
        })
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    object_not_found(bucket, key)
                } else {
                    s3_error(e)
                }
            })?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: resp.content_length().unwrap_or_default(),
            content_type: resp.content_type().map(str::to_string),
            last_modified: resp.last_modified().and_then(to_chrono),
        })
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_delimiter((!recursive).then(|| "/".to_string()))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(s3_error)?;

            for object in resp.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default(),
                    content_type: None,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }
}
