//! In-process store implementations
//!
//! Used by the CLI and by tests. Similarity search scores nodes by term
//! overlap, which is enough to exercise the pipeline without a vector index.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::backend::{DynamicStore, KnowledgeStore, StructuredStore};
use crate::error::Result;
use crate::types::{value_as_id, EnrichedDocument, Fields, SimilarNode};

fn matches_filter(doc: &Fields, filter: &Fields) -> bool {
    filter.iter().all(|(key, expected)| match doc.get(key) {
        Some(actual) if actual == expected => true,
        // relationship fields may be populated objects carrying an id
        Some(actual) => match (value_as_id(actual), expected.as_str()) {
            (Some(id), Some(wanted)) => id == wanted,
            _ => false,
        },
        None => false,
    })
}

fn doc_id(doc: &Fields) -> Option<String> {
    doc.get("id").or_else(|| doc.get("_id")).and_then(value_as_id)
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Collection store held in memory
#[derive(Default)]
pub struct InMemoryStructuredStore {
    collections: RwLock<BTreeMap<String, Vec<Fields>>>,
}

impl InMemoryStructuredStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, doc: Fields) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Load `{collection: [docs...]}` seed data
    pub fn load(&self, seed: &Fields) -> usize {
        let mut count = 0;
        for (collection, docs) in seed {
            if let Value::Array(items) = docs {
                for item in items {
                    if let Value::Object(doc) = item {
                        self.insert(collection, doc.clone());
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

#[async_trait]
impl StructuredStore for InMemoryStructuredStore {
    async fn find(&self, collection: &str, filter: &Fields, limit: usize) -> Result<Vec<Fields>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, filter))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        let collections = self.collections.read();
        Ok(collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|d| doc_id(d).as_deref() == Some(id))
                .cloned()
        }))
    }
}

/// Knowledge store held in memory
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    nodes: DashMap<String, EnrichedDocument>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn add_node(&self, document: &EnrichedDocument) -> Result<()> {
        self.nodes.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        project_id: &str,
    ) -> Result<Vec<SimilarNode>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<SimilarNode> = self
            .nodes
            .iter()
            .filter(|n| n.project_id == project_id)
            .filter_map(|n| {
                let node_terms = terms(&n.text);
                let overlap = query_terms.intersection(&node_terms).count();
                if overlap == 0 {
                    return None;
                }
                let union = query_terms.union(&node_terms).count();
                Some(SimilarNode {
                    id: n.id.clone(),
                    node_type: n.doc_type.clone(),
                    content: n.text.chars().take(500).collect(),
                    score: overlap as f32 / union as f32,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn get_node(&self, id: &str) -> Result<Option<EnrichedDocument>> {
        Ok(self.nodes.get(id).map(|n| n.clone()))
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        Ok(self.nodes.remove(id).is_some())
    }
}

/// Per-project document databases held in memory
#[derive(Default)]
pub struct InMemoryDynamicStore {
    projects: DashMap<String, BTreeMap<String, Vec<Fields>>>,
}

impl InMemoryDynamicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_id: &str, collection: &str, doc: Fields) {
        self.projects
            .entry(project_id.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }
}

#[async_trait]
impl DynamicStore for InMemoryDynamicStore {
    async fn list_collections(&self, project_id: &str) -> Result<Vec<String>> {
        Ok(self
            .projects
            .get(project_id)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn find(
        &self,
        project_id: &str,
        collection: &str,
        filter: &Fields,
        limit: usize,
    ) -> Result<Vec<Fields>> {
        Ok(self
            .projects
            .get(project_id)
            .and_then(|p| {
                p.get(collection).map(|docs| {
                    docs.iter()
                        .filter(|d| matches_filter(d, filter))
                        .take(limit)
                        .cloned()
                        .collect()
                })
            })
            .unwrap_or_default())
    }

    async fn count_documents(&self, project_id: &str, collection: &str) -> Result<u64> {
        Ok(self
            .projects
            .get(project_id)
            .and_then(|p| p.get(collection).map(|docs| docs.len() as u64))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn doc(id: &str, project: &str, text: &str) -> EnrichedDocument {
        EnrichedDocument {
            id: id.into(),
            doc_type: "character".into(),
            project_id: project.into(),
            text: text.into(),
            metadata: Fields::new(),
            relationships: vec![],
        }
    }

    #[tokio::test]
    async fn test_structured_find_with_filter() {
        let store = InMemoryStructuredStore::new();
        store.insert("characters", fields(json!({"id": "c1", "project": "p1", "name": "Jafar"})));
        store.insert("characters", fields(json!({"id": "c2", "project": {"id": "p2"}, "name": "Genie"})));
        store.insert("characters", fields(json!({"id": "c3", "project": {"id": "p1"}, "name": "Iago"})));

        let filter = fields(json!({"project": "p1"}));
        let found = store.find("characters", &filter, 10).await.unwrap();
        assert_eq!(found.len(), 2);

        let one = store.find_by_id("characters", "c2").await.unwrap().unwrap();
        assert_eq!(one.get("name"), Some(&json!("Genie")));
        assert!(store.find_by_id("scenes", "c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_knowledge_similarity_scoped_to_project() {
        let store = InMemoryKnowledgeStore::new();
        store.add_node(&doc("a", "p1", "Aladdin steals bread in the market")).await.unwrap();
        store.add_node(&doc("b", "p1", "The Sultan rules the palace")).await.unwrap();
        store.add_node(&doc("c", "p2", "Aladdin in another project")).await.unwrap();

        let hits = store.search_similar("Aladdin market", 5, "p1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        assert!(store.delete_node("a").await.unwrap());
        assert!(!store.delete_node("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_dynamic_store() {
        let store = InMemoryDynamicStore::new();
        store.insert("p1", "props", fields(json!({"name": "Lamp"})));
        store.insert("p1", "props", fields(json!({"name": "Carpet"})));
        store.insert("p1", "songs", fields(json!({"name": "Friend Like Me"})));

        assert_eq!(
            store.list_collections("p1").await.unwrap(),
            vec!["props".to_string(), "songs".to_string()]
        );
        assert_eq!(store.count_documents("p1", "props").await.unwrap(), 2);
        let sample = store.find("p1", "props", &Fields::new(), 1).await.unwrap();
        assert_eq!(sample.len(), 1);
        assert!(store.list_collections("nope").await.unwrap().is_empty());
    }

    #[test]
    fn test_load_seed_skips_non_objects() {
        let store = InMemoryStructuredStore::new();
        let seed = fields(json!({
            "projects": [{"id": "p1", "name": "Desert Tales"}, 42],
            "characters": [{"id": "c1", "project": "p1", "name": "Aladdin"}],
            "notes": "not a list"
        }));
        assert_eq!(store.load(&seed), 2);

        let project = tokio_test::block_on(store.find_by_id("projects", "p1")).unwrap();
        assert_eq!(project.unwrap().get("name"), Some(&json!("Desert Tales")));
    }
}
