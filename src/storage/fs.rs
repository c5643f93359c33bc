use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::{ByteRange, ObjectInfo, ObjectStore, object_not_found, validate_bucket};
use crate::error::{Error, Result};

/// Object store backed by a local directory: `<root>/<bucket>/<key>`.
/// Writes land in a temp file first and are renamed into place.
pub struct FsObjectStore {
    base_path: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf> {
        validate_bucket(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_path(bucket)?.join(key))
    }

    fn temp_path(&self) -> PathBuf {
        // Underscores are not legal in bucket names, so this never collides.
        self.base_path.join("_tmp").join(Uuid::new_v4().to_string())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let path = self.bucket_path(bucket)?;
        if !fs::try_exists(&path).await? {
            return Err(Error::S3(format!("bucket '{bucket}' does not exist")));
        }
        Ok(path)
    }

    async fn write_atomic(&self, final_path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_file = File::create(&temp_path).await?;
        temp_file.write_all(data).await?;
        temp_file.sync_all().await?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&temp_path, final_path).await?;
        Ok(())
    }

    async fn info(&self, path: &Path, key: &str) -> Result<ObjectInfo> {
        let metadata = fs::metadata(path).await?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: metadata.len() as i64,
            content_type: None,
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\0')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..");
    if invalid {
        return Err(Error::S3(format!("invalid object key '{key}'")));
    }
    Ok(())
}

fn from_io(e: std::io::Error, bucket: &str, key: &str) -> Error {
    if e.kind() == ErrorKind::NotFound {
        object_not_found(bucket, key)
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let path = self.bucket_path(bucket)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn fput_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> Result<ObjectInfo> {
        self.ensure_bucket(bucket).await?;
        let final_path = self.object_path(bucket, key)?;
        let data = fs::read(path).await?;
        self.write_atomic(&final_path, &data).await?;
        self.info(&final_path, key).await
    }

    async fn fget_object(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let source = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, path)
            .await
            .map_err(|e| from_io(e, bucket, key))?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes> {
        let path = self.object_path(bucket, key)?;
        let Some(range) = range else {
            let data = fs::read(&path).await.map_err(|e| from_io(e, bucket, key))?;
            return Ok(Bytes::from(data));
        };

        let mut file = File::open(&path).await.map_err(|e| from_io(e, bucket, key))?;
        let size = file.metadata().await?.len();
        if range.start >= size {
            return Err(Error::bad_request(
                "invalid_range",
                format!("range start {} is beyond object size {size}", range.start),
            ));
        }
        let end = range.end.min(size - 1);
        let mut buf = vec![0u8; (end - range.start + 1) as usize];
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<ObjectInfo> {
        self.ensure_bucket(bucket).await?;
        let final_path = self.object_path(bucket, key)?;
        self.write_atomic(&final_path, &data).await?;
        self.info(&final_path, key).await
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let path = self.object_path(bucket, key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| from_io(e, bucket, key))?;
        if metadata.is_dir() {
            return Err(object_not_found(bucket, key));
        }
        self.info(&path, key).await
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        }

        // Prune now-empty key directories up to the bucket.
        let bucket_path = self.bucket_path(bucket)?;
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == bucket_path || fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>> {
        let bucket_path = self.ensure_bucket(bucket).await?;
        let mut objects = Vec::new();
        let mut pending = vec![bucket_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&bucket_path) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                let Some(rest) = key.strip_prefix(prefix) else {
                    continue;
                };
                if !recursive && rest.contains('/') {
                    continue;
                }
                objects.push(self.info(&path, &key).await?);
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsObjectStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp_dir.path().join("objects"));
        store.make_bucket("bucket-1").await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_put_get_stat() {
        let (_dir, store) = store().await;
        let info = store
            .put_object("bucket-1", "s1/original.txt", Bytes::from("hello"), "text/plain")
            .await
            .unwrap();
        assert_eq!(info.size, 5);

        let data = store
            .get_object("bucket-1", "s1/original.txt", None)
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello");

        let stat = store.stat_object("bucket-1", "s1/original.txt").await.unwrap();
        assert_eq!(stat.size, 5);
    }

    #[tokio::test]
    async fn test_range_read() {
        let (_dir, store) = store().await;
        store
            .put_object("bucket-1", "k", Bytes::from("0123456789"), "text/plain")
            .await
            .unwrap();
        let data = store
            .get_object("bucket-1", "k", Some(ByteRange { start: 2, end: 5 }))
            .await
            .unwrap();
        assert_eq!(&data[..], b"2345");
    }

    #[tokio::test]
    async fn test_put_text_rejects_other_types() {
        let (_dir, store) = store().await;
        assert!(
            store
                .put_text("bucket-1", "a.json", "{}", "application/json")
                .await
                .is_ok()
        );
        assert!(
            store
                .put_text("bucket-1", "a.html", "<p>", "text/html")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let (_dir, store) = store().await;
        store.remove_object("bucket-1", "nope/original.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_missing_fails() {
        let (_dir, store) = store().await;
        assert!(store.stat_object("bucket-1", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_list_objects() {
        let (_dir, store) = store().await;
        for key in ["s1/original.txt", "s1/preview.pdf", "s2/original.txt", "top"] {
            store
                .put_object("bucket-1", key, Bytes::from("x"), "text/plain")
                .await
                .unwrap();
        }

        let keys: Vec<_> = store
            .list_objects("bucket-1", "s1/", true)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["s1/original.txt", "s1/preview.pdf"]);

        let top: Vec<_> = store
            .list_objects("bucket-1", "", false)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(top, vec!["top"]);
    }

    #[tokio::test]
    async fn test_remove_bucket_with_content() {
        let (_dir, store) = store().await;
        store
            .put_object("bucket-1", "s1/original.txt", Bytes::from("x"), "text/plain")
            .await
            .unwrap();
        store.remove_bucket("bucket-1").await.unwrap();
        assert!(!store.bucket_exists("bucket-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (_dir, store) = store().await;
        assert!(
            store
                .put_object("bucket-1", "../escape", Bytes::from("x"), "text/plain")
                .await
                .is_err()
        );
    }
}
