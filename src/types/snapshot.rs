use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProps {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// A reference to an object in the object store, plus what we know about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageProps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentProps>,
}

impl S3Object {
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: i64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
            image: None,
            document: None,
        }
    }

    /// Lowercased extension of the key including the dot.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.key)
    }
}

/// Lowercased extension of a file name including the dot, e.g. `.pdf`.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let idx = base.rfind('.')?;
    if idx == 0 && base.len() == 1 {
        return None;
    }
    Some(base[idx..].to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Waiting,
    Processing,
    Ready,
    Error,
}

impl SnapshotStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<SnapshotStatus> {
        match s {
            "waiting" => Some(Self::Waiting),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }

    /// Legal moves of the status machine. Terminal states only go back to
    /// `processing` through an explicit re-run.
    #[must_use]
    pub fn can_transition_to(self, next: SnapshotStatus) -> bool {
        use SnapshotStatus::*;
        matches!(
            (self, next),
            (Waiting, Processing | Ready | Error)
                | (Processing, Ready | Error)
                | (Ready | Error, Processing)
        ) || (self == next && self != Processing)
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mosaic: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<S3Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<S3Object>,
    pub status: SnapshotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub create_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Every populated object reference held by this snapshot.
    #[must_use]
    pub fn objects(&self) -> Vec<&S3Object> {
        [
            &self.original,
            &self.preview,
            &self.text,
            &self.ocr,
            &self.entities,
            &self.mosaic,
            &self.watermark,
            &self.thumbnail,
        ]
        .into_iter()
        .filter_map(Option::as_ref)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Original,
    Preview,
    Text,
    Ocr,
    Entities,
    Mosaic,
    Watermark,
    Thumbnail,
    Status,
    Error,
    Language,
    TaskId,
}

/// A partial update of a snapshot. Only the fields listed in `fields` are
/// written; a listed field with a `None` value is cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotPatch {
    pub fields: Vec<SnapshotField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mosaic: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<S3Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SnapshotStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// When set, the patch only applies if the current status matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<SnapshotStatus>,
}

impl SnapshotPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn original(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Original);
        self.original = Some(value);
        self
    }

    #[must_use]
    pub fn preview(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Preview);
        self.preview = Some(value);
        self
    }

    #[must_use]
    pub fn text(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Text);
        self.text = Some(value);
        self
    }

    #[must_use]
    pub fn ocr(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Ocr);
        self.ocr = Some(value);
        self
    }

    #[must_use]
    pub fn entities(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Entities);
        self.entities = Some(value);
        self
    }

    #[must_use]
    pub fn mosaic(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Mosaic);
        self.mosaic = Some(value);
        self
    }

    #[must_use]
    pub fn watermark(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Watermark);
        self.watermark = Some(value);
        self
    }

    #[must_use]
    pub fn language(mut self, value: Option<String>) -> Self {
        self.fields.push(SnapshotField::Language);
        self.language = value;
        self
    }

    #[must_use]
    pub fn thumbnail(mut self, value: S3Object) -> Self {
        self.fields.push(SnapshotField::Thumbnail);
        self.thumbnail = Some(value);
        self
    }

    #[must_use]
    pub fn status(mut self, value: SnapshotStatus) -> Self {
        self.fields.push(SnapshotField::Status);
        self.status = Some(value);
        self
    }

    #[must_use]
    pub fn error(mut self, value: Option<String>) -> Self {
        self.fields.push(SnapshotField::Error);
        self.error = value;
        self
    }

    #[must_use]
    pub fn task_id(mut self, value: Option<String>) -> Self {
        self.fields.push(SnapshotField::TaskId);
        self.task_id = value;
        self
    }

    #[must_use]
    pub fn expect_status(mut self, value: SnapshotStatus) -> Self {
        self.expected_status = Some(value);
        self
    }

    #[must_use]
    pub fn has(&self, field: SnapshotField) -> bool {
        self.fields.contains(&field)
    }

    /// Applies the listed fields onto `snapshot`, leaving the rest untouched.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        for field in &self.fields {
            match field {
                SnapshotField::Original => snapshot.original = self.original.clone(),
                SnapshotField::Preview => snapshot.preview = self.preview.clone(),
                SnapshotField::Text => snapshot.text = self.text.clone(),
                SnapshotField::Ocr => snapshot.ocr = self.ocr.clone(),
                SnapshotField::Entities => snapshot.entities = self.entities.clone(),
                SnapshotField::Mosaic => snapshot.mosaic = self.mosaic.clone(),
                SnapshotField::Watermark => snapshot.watermark = self.watermark.clone(),
                SnapshotField::Thumbnail => snapshot.thumbnail = self.thumbnail.clone(),
                SnapshotField::Status => {
                    if let Some(status) = self.status {
                        snapshot.status = status;
                    }
                }
                SnapshotField::Error => snapshot.error = self.error.clone(),
                SnapshotField::Language => snapshot.language = self.language.clone(),
                SnapshotField::TaskId => snapshot.task_id = self.task_id.clone(),
            }
        }
    }
}

/// An uploaded original, already written to the object store under
/// `<snapshot_id>/original<.ext>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Reference {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub snapshot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl S3Reference {
    /// Key under which the original of `snapshot_id` is stored.
    #[must_use]
    pub fn original_key(snapshot_id: &str, file_name: &str) -> String {
        format!(
            "{snapshot_id}/original{}",
            extension_of(file_name).unwrap_or_default()
        )
    }

    #[must_use]
    pub fn to_object(&self) -> S3Object {
        S3Object::new(&self.bucket, &self.key, self.size)
    }
}

/// Identifiers of the conversion pipelines. The last four only run when
/// asked for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineId {
    Pdf,
    Office,
    Image,
    AudioVideo,
    Noop,
    Ocr,
    Entity,
    Mosaic,
    Watermark,
}

impl PipelineId {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Office => "office",
            Self::Image => "image",
            Self::AudioVideo => "audio_video",
            Self::Noop => "noop",
            Self::Ocr => "ocr",
            Self::Entity => "entity",
            Self::Mosaic => "mosaic",
            Self::Watermark => "watermark",
        }
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run payload key holding the OCR or entity language.
pub const PAYLOAD_LANGUAGE: &str = "language";
/// Run payload keys holding the values stamped by the watermark pipeline.
pub const PAYLOAD_WORKSPACE: &str = "workspace";
pub const PAYLOAD_USER: &str = "user";

/// Request to run a pipeline over a snapshot's original object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub snapshot_id: String,
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<HashMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            id: "s1".into(),
            version: 1,
            original: Some(S3Object::new("b", "s1/original.txt", 5)),
            preview: None,
            text: None,
            ocr: None,
            entities: None,
            mosaic: None,
            watermark: None,
            thumbnail: None,
            status: SnapshotStatus::Waiting,
            error: None,
            language: None,
            task_id: Some("t1".into()),
            create_time: Utc::now(),
            update_time: None,
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/Report.PDF").as_deref(), Some(".pdf"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".bashrc").as_deref(), Some(".bashrc"));
    }

    #[test]
    fn test_original_key() {
        assert_eq!(S3Reference::original_key("s1", "Report.PDF"), "s1/original.pdf");
        assert_eq!(S3Reference::original_key("s1", "Makefile"), "s1/original");
    }

    #[test]
    fn test_status_transitions() {
        use SnapshotStatus::*;
        assert!(Waiting.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(Processing.can_transition_to(Error));
        assert!(Ready.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Processing));
        assert!(!Ready.can_transition_to(Waiting));
        assert!(!Error.can_transition_to(Ready));
    }

    #[test]
    fn test_patch_preserves_untouched_fields() {
        let mut s = snapshot();
        let patch = SnapshotPatch::new()
            .preview(S3Object::new("b", "s1/preview.pdf", 10))
            .status(SnapshotStatus::Processing);
        patch.apply(&mut s);

        assert_eq!(s.preview.as_ref().map(|o| o.size), Some(10));
        assert_eq!(s.status, SnapshotStatus::Processing);
        assert_eq!(s.original.as_ref().map(|o| o.key.as_str()), Some("s1/original.txt"));
        assert_eq!(s.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_patch_clears_listed_none() {
        let mut s = snapshot();
        SnapshotPatch::new().task_id(None).apply(&mut s);
        assert!(s.task_id.is_none());
    }

    #[test]
    fn test_objects_lists_populated_fields() {
        let mut s = snapshot();
        s.thumbnail = Some(S3Object::new("b", "s1/thumbnail.png", 3));
        s.watermark = Some(S3Object::new("b", "s1/watermark.txt", 5));
        let keys: Vec<_> = s.objects().iter().map(|o| o.key.clone()).collect();
        assert_eq!(keys, vec!["s1/original.txt", "s1/watermark.txt", "s1/thumbnail.png"]);
    }
}
