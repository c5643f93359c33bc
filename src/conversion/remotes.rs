//! HTTP services some pipelines hand work to: entity extraction, mosaic
//! tiling and watermarking. Each is optional; a pipeline that needs a missing
//! one fails its run.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::remote::RemoteClient;

/// A named entity found in a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub text: String,
    pub label: String,
    #[serde(default)]
    pub frequency: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicZoomLevel {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub rows: u32,
    pub cols: u32,
}

/// Layout of a tiled image as reported by the mosaic service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicMetadata {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub zoom_levels: Vec<MosaicZoomLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkCategory {
    Image,
    Document,
}

impl WatermarkCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
        }
    }
}

/// Where the watermarked copy goes and what it is stamped with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkRequest {
    pub bucket: String,
    pub key: String,
    pub category: WatermarkCategory,
    pub values: Vec<String>,
}

#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn entities(&self, text: &str, language: &str) -> Result<Vec<EntityMention>>;
}

#[async_trait]
pub trait MosaicService: Send + Sync {
    /// Tiles `image` and stores the tiles under `bucket`/`key`.
    async fn create(&self, image: &Path, bucket: &str, key: &str) -> Result<MosaicMetadata>;
}

#[async_trait]
pub trait WatermarkService: Send + Sync {
    /// Stores a watermarked copy of `input` at the request's bucket and key.
    async fn create(&self, input: &Path, request: &WatermarkRequest) -> Result<()>;
}

/// The services available to this conversion process.
#[derive(Clone, Default)]
pub struct Remotes {
    pub language: Option<Arc<dyn LanguageService>>,
    pub mosaic: Option<Arc<dyn MosaicService>>,
    pub watermark: Option<Arc<dyn WatermarkService>>,
}

impl fmt::Debug for Remotes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remotes")
            .field("language", &self.language.is_some())
            .field("mosaic", &self.mosaic.is_some())
            .field("watermark", &self.watermark.is_some())
            .finish()
    }
}

fn missing(name: &str) -> Error {
    Error::Remote(format!("no {name} service is configured"))
}

impl Remotes {
    /// HTTP clients for every non-empty URL.
    pub fn from_urls(language_url: &str, mosaic_url: &str, watermark_url: &str) -> Result<Self> {
        let client = |url: &str| -> Result<Option<RemoteClient>> {
            match url.trim() {
                "" => Ok(None),
                url => RemoteClient::new(url).map(Some),
            }
        };
        Ok(Self {
            language: client(language_url)?
                .map(|c| Arc::new(HttpLanguageService::new(c)) as Arc<dyn LanguageService>),
            mosaic: client(mosaic_url)?
                .map(|c| Arc::new(HttpMosaicService::new(c)) as Arc<dyn MosaicService>),
            watermark: client(watermark_url)?
                .map(|c| Arc::new(HttpWatermarkService::new(c)) as Arc<dyn WatermarkService>),
        })
    }

    pub fn language(&self) -> Result<&dyn LanguageService> {
        self.language.as_deref().ok_or_else(|| missing("language"))
    }

    pub fn mosaic(&self) -> Result<&dyn MosaicService> {
        self.mosaic.as_deref().ok_or_else(|| missing("mosaic"))
    }

    pub fn watermark(&self) -> Result<&dyn WatermarkService> {
        self.watermark.as_deref().ok_or_else(|| missing("watermark"))
    }
}

async fn file_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

#[derive(Serialize)]
struct EntitiesRequest<'a> {
    text: &'a str,
    language: &'a str,
}

/// `POST /v3/entities`.
pub struct HttpLanguageService {
    client: RemoteClient,
}

impl HttpLanguageService {
    #[must_use]
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LanguageService for HttpLanguageService {
    async fn entities(&self, text: &str, language: &str) -> Result<Vec<EntityMention>> {
        self.client
            .post("/entities", &EntitiesRequest { text, language })
            .await
    }
}

/// `POST /v3/mosaics` with the image and its target location as a form.
pub struct HttpMosaicService {
    client: RemoteClient,
}

impl HttpMosaicService {
    #[must_use]
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MosaicService for HttpMosaicService {
    async fn create(&self, image: &Path, bucket: &str, key: &str) -> Result<MosaicMetadata> {
        let form = Form::new()
            .part("file", file_part(image).await?)
            .text("s3_key", key.to_string())
            .text("s3_bucket", bucket.to_string());
        let req = self.client.request(Method::POST, "/mosaics").multipart(form);
        self.client.json(req).await
    }
}

/// `POST /v2/watermarks`; the service writes the result to storage itself.
pub struct HttpWatermarkService {
    client: RemoteClient,
}

impl HttpWatermarkService {
    #[must_use]
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WatermarkService for HttpWatermarkService {
    async fn create(&self, input: &Path, request: &WatermarkRequest) -> Result<()> {
        let mut form = Form::new()
            .part("file", file_part(input).await?)
            .text("s3_key", request.key.clone())
            .text("s3_bucket", request.bucket.clone())
            .text("category", request.category.as_str());
        for value in &request.values {
            form = form.text("values", value.clone());
        }
        let req = self
            .client
            .versioned(Method::POST, "v2", "/watermarks")
            .multipart(form);
        self.client.send(req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_urls_leave_services_unset() {
        let remotes = Remotes::from_urls("", " ", "http://127.0.0.1:8086").unwrap();
        assert!(remotes.language().is_err());
        assert!(remotes.mosaic().is_err());
        assert!(remotes.watermark().is_ok());
        assert_eq!(
            format!("{remotes:?}"),
            "Remotes { language: false, mosaic: false, watermark: true }"
        );
    }

    #[test]
    fn test_mosaic_metadata_reads_service_json() {
        let json = r#"{"isOutdated":false,"width":4096,"height":2048,"extension":".jpg",
            "zoomLevels":[{"index":0,"width":4096,"height":2048,"rows":8,"cols":16,
            "scaleDownPercentage":100,"tile":{"width":256,"height":256}}]}"#;
        let metadata: MosaicMetadata = serde_json::from_str(json).unwrap();
        assert_eq!((metadata.width, metadata.height), (4096, 2048));
        assert_eq!(metadata.zoom_levels[0].cols, 16);
    }
}
