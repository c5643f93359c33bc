//! Search index: per-kind documents with searchable text fields and
//! filterable attributes.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub use memory::MemorySearch;

use crate::error::Result;
use crate::types::{File, Group, Organization, User, Workspace};

pub const FILE_INDEX: &str = "file";
pub const WORKSPACE_INDEX: &str = "workspace";
pub const ORGANIZATION_INDEX: &str = "organization";
pub const GROUP_INDEX: &str = "group";
pub const USER_INDEX: &str = "user";

/// Fields matched by free-text queries on each index.
#[must_use]
pub fn searchable_fields(index: &str) -> &'static [&'static str] {
    match index {
        FILE_INDEX => &["name", "text"],
        USER_INDEX => &["email", "full_name"],
        _ => &["name"],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    fn from_value(id: &str, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.to_string(),
            fields,
        }
    }

    #[must_use]
    pub fn field_str(&self, name: &str) -> Option<&str> {
        if name == "id" {
            return Some(&self.id);
        }
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Free text plus equality filters. An empty text matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filter.insert(field.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Inserts or replaces documents by id.
    async fn index(&self, index: &str, documents: Vec<Document>) -> Result<()>;
    async fn delete(&self, index: &str, ids: &[String]) -> Result<()>;
    async fn query(&self, index: &str, query: &SearchQuery) -> Result<Vec<Document>>;
}

#[must_use]
pub fn file_document(file: &File) -> Document {
    Document::from_value(
        &file.id,
        json!({
            "workspace_id": file.workspace_id,
            "name": file.name,
            "type": file.file_type.as_str(),
            "parent_id": file.parent_id,
            "snapshot_id": file.snapshot_id,
            "text": file.text,
            "create_time": file.create_time.to_rfc3339(),
            "update_time": file.update_time.map(|t| t.to_rfc3339()),
        }),
    )
}

#[must_use]
pub fn workspace_document(workspace: &Workspace) -> Document {
    Document::from_value(
        &workspace.id,
        json!({
            "name": workspace.name,
            "organization_id": workspace.organization_id,
            "root_id": workspace.root_id,
            "storage_capacity": workspace.storage_capacity,
            "create_time": workspace.create_time.to_rfc3339(),
        }),
    )
}

#[must_use]
pub fn organization_document(org: &Organization) -> Document {
    Document::from_value(
        &org.id,
        json!({
            "name": org.name,
            "create_time": org.create_time.to_rfc3339(),
        }),
    )
}

#[must_use]
pub fn group_document(group: &Group) -> Document {
    Document::from_value(
        &group.id,
        json!({
            "name": group.name,
            "organization_id": group.organization_id,
            "create_time": group.create_time.to_rfc3339(),
        }),
    )
}

#[must_use]
pub fn user_document(user: &User) -> Document {
    Document::from_value(
        &user.id,
        json!({
            "username": user.username,
            "email": user.email,
            "full_name": user.full_name,
            "create_time": user.create_time.to_rfc3339(),
        }),
    )
}
