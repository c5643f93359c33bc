use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{Document, SearchIndex, SearchQuery, searchable_fields};
use crate::error::Result;

/// In-process index. Matches case-insensitive substrings over the
/// searchable fields and applies equality filters; insertion order is kept.
#[derive(Default)]
pub struct MemorySearch {
    indexes: RwLock<HashMap<String, BTreeMap<u64, Document>>>,
    positions: RwLock<HashMap<(String, String), u64>>,
    counter: std::sync::atomic::AtomicU64,
}

impl MemorySearch {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(document: &Document, index: &str, query: &SearchQuery) -> bool {
    let filtered = query
        .filter
        .iter()
        .all(|(field, value)| document.field_str(field) == Some(value.as_str()));
    if !filtered {
        return false;
    }

    let needle = query.text.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    searchable_fields(index).iter().any(|field| {
        document
            .field_str(field)
            .is_some_and(|v| v.to_lowercase().contains(&needle))
    })
}

#[async_trait]
impl SearchIndex for MemorySearch {
    async fn index(&self, index: &str, documents: Vec<Document>) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        let mut positions = self.positions.write().unwrap_or_else(|e| e.into_inner());
        let entries = indexes.entry(index.to_string()).or_default();

        for document in documents {
            let key = (index.to_string(), document.id.clone());
            let position = *positions.entry(key).or_insert_with(|| {
                self.counter
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            });
            entries.insert(position, document);
        }
        Ok(())
    }

    async fn delete(&self, index: &str, ids: &[String]) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        let mut positions = self.positions.write().unwrap_or_else(|e| e.into_inner());

        for id in ids {
            if let Some(position) = positions.remove(&(index.to_string(), id.clone())) {
                if let Some(entries) = indexes.get_mut(index) {
                    entries.remove(&position);
                }
            }
        }
        Ok(())
    }

    async fn query(&self, index: &str, query: &SearchQuery) -> Result<Vec<Document>> {
        let indexes = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = indexes.get(index) else {
            return Ok(Vec::new());
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(entries
            .values()
            .filter(|d| matches(d, index, query))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn doc(id: &str, value: serde_json::Value) -> Document {
        let fields: Map<String, serde_json::Value> = match value {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        };
        Document {
            id: id.to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_query_matches_searchable_fields() {
        let search = MemorySearch::new();
        search
            .index(
                "file",
                vec![
                    doc("1", json!({"name": "Quarterly Report.pdf", "workspace_id": "w1"})),
                    doc("2", json!({"name": "notes.txt", "text": "the report draft", "workspace_id": "w1"})),
                    doc("3", json!({"name": "report.md", "workspace_id": "w2"})),
                ],
            )
            .await
            .unwrap();

        let ids: Vec<_> = search
            .query("file", &SearchQuery::text("REPORT").filter("workspace_id", "w1"))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_reindex_replaces_in_place() {
        let search = MemorySearch::new();
        search
            .index("group", vec![doc("a", json!({"name": "one"})), doc("b", json!({"name": "two"}))])
            .await
            .unwrap();
        search
            .index("group", vec![doc("a", json!({"name": "uno"}))])
            .await
            .unwrap();

        let all = search.query("group", &SearchQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].field_str("name"), Some("uno"));
    }

    #[tokio::test]
    async fn test_delete_and_limit() {
        let search = MemorySearch::new();
        search
            .index(
                "workspace",
                (0..5).map(|i| doc(&i.to_string(), json!({"name": "ws"}))).collect(),
            )
            .await
            .unwrap();
        search
            .delete("workspace", &["0".to_string(), "1".to_string()])
            .await
            .unwrap();

        let hits = search
            .query("workspace", &SearchQuery::text("ws").limit(2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "2");
    }
}
