//! Object storage: named binary blobs grouped by bucket.

mod fs;
#[cfg(feature = "s3")]
mod s3;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use fs::FsObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use crate::error::{Error, Result};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content types accepted by [`ObjectStore::put_text`].
pub const TEXT_CONTENT_TYPES: &[&str] = &["text/plain", "application/json"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Inclusive byte range, as in `Range: bytes=start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Parses a single `bytes=a-b` range against an object of `size` bytes.
    /// An open end means the last byte. Returns `None` when unsatisfiable.
    #[must_use]
    pub fn parse(header: &str, size: u64) -> Option<ByteRange> {
        let spec = header.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        if size == 0 {
            return None;
        }

        let (start, end) = match (start.trim(), end.trim()) {
            ("", "") => return None,
            // Suffix form: the last N bytes.
            ("", suffix) => {
                let n: u64 = suffix.parse().ok()?;
                if n == 0 {
                    return None;
                }
                (size.saturating_sub(n), size - 1)
            }
            (start, "") => (start.parse().ok()?, size - 1),
            (start, end) => (start.parse().ok()?, end.parse::<u64>().ok()?.min(size - 1)),
        };

        if start > end || start >= size {
            return None;
        }
        Some(ByteRange { start, end })
    }
}

/// Capability interface over an S3-like object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Empties the bucket, then removes it.
    async fn remove_bucket(&self, bucket: &str) -> Result<()>;

    async fn fput_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<ObjectInfo>;

    async fn fget_object(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str, range: Option<ByteRange>)
    -> Result<Bytes>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ObjectInfo>;

    async fn put_text(
        &self,
        bucket: &str,
        key: &str,
        text: &str,
        content_type: &str,
    ) -> Result<ObjectInfo> {
        if !TEXT_CONTENT_TYPES.contains(&content_type) {
            return Err(Error::bad_request(
                "invalid_content_type",
                format!("content type '{content_type}' is not allowed for text objects"),
            ));
        }
        self.put_object(bucket, key, Bytes::from(text.to_string()), content_type)
            .await
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Removing a missing object is not an error.
    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool)
    -> Result<Vec<ObjectInfo>>;

    async fn remove_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove_object(bucket, key).await?;
        }
        Ok(())
    }
}

pub(crate) fn object_not_found(bucket: &str, key: &str) -> Error {
    Error::S3(format!("object '{bucket}/{key}' does not exist"))
}

/// Bucket names follow S3 rules: 3 to 63 lowercase letters, digits, dots or hyphens.
pub fn validate_bucket(bucket: &str) -> Result<()> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if !(3..=63).contains(&bucket.len()) || !valid_chars {
        return Err(Error::S3(format!("invalid bucket name '{bucket}'")));
    }
    Ok(())
}
