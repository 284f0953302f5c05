//! Context gathering across independent data sources
//!
//! Resolves the project (cache first), then fans out to the structured
//! store, the knowledge store and the dynamic store in parallel.
//!
//! ## Invariants
//!
//! - A failing source yields its empty default and an entry in
//!   `source_errors`; sibling fetches keep running
//! - Sources not selected for the entity's enrichment level are not called
//! - Related-entity matching never matches the entity against itself

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::CacheManager;
use crate::config::{ContextSource, GathererConfig};
use crate::error::{PrepError, Result};
use crate::storage::{DynamicStore, KnowledgeStore, StructuredStore};
use crate::types::{
    value_as_id, DynamicContext, Fields, GatheredContext, KnowledgeContext, ProjectContext,
    RawEntity, RelatedEntity,
};

/// Dynamic collections never sampled
const SYSTEM_COLLECTION_PREFIXES: &[&str] = &["system.", "_", "sessions", "migrations"];

/// Minimum name length considered for substring matching
const MIN_MATCH_LEN: usize = 3;

/// Fans out context fetches for one entity
pub struct ContextGatherer {
    structured: Arc<dyn StructuredStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    dynamic: Arc<dyn DynamicStore>,
    cache: Arc<CacheManager>,
    config: GathererConfig,
    caching: bool,
}

impl ContextGatherer {
    pub fn new(
        structured: Arc<dyn StructuredStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        dynamic: Arc<dyn DynamicStore>,
        cache: Arc<CacheManager>,
        config: GathererConfig,
    ) -> Self {
        Self {
            structured,
            knowledge,
            dynamic,
            cache,
            config,
            caching: true,
        }
    }

    /// Enable or disable project-context caching
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching = enabled;
        self
    }

    /// Gather from every source
    pub async fn gather_all(&self, raw: &RawEntity, project_id: &str) -> Result<GatheredContext> {
        self.gather(raw, project_id, ContextSource::all()).await
    }

    /// Gather from the selected sources only
    #[instrument(skip(self, raw), fields(entity_type = raw.entity_type()))]
    pub async fn gather(
        &self,
        raw: &RawEntity,
        project_id: &str,
        sources: &[ContextSource],
    ) -> Result<GatheredContext> {
        if project_id.trim().is_empty() {
            return Err(PrepError::InvalidInput("projectId is required".to_string()));
        }

        let (project, project_error) = self.resolve_project(project_id).await;
        let query = raw.combined_text();

        let want = |s: ContextSource| sources.contains(&s);
        let (structured, knowledge, dynamic) = tokio::join!(
            async {
                if want(ContextSource::Structured) {
                    Some(self.fetch_structured(project_id).await)
                } else {
                    None
                }
            },
            async {
                if want(ContextSource::Knowledge) {
                    Some(self.fetch_knowledge(&query, project_id).await)
                } else {
                    None
                }
            },
            async {
                if want(ContextSource::Dynamic) {
                    Some(self.fetch_dynamic(project_id).await)
                } else {
                    None
                }
            },
        );

        let mut context = GatheredContext::empty(project);
        context.source_errors.extend(project_error);

        if let Some((collections, errors)) = structured {
            context.structured_store = collections;
            context.source_errors.extend(errors);
        }
        match knowledge {
            Some(Ok(k)) => context.knowledge = k,
            Some(Err(e)) => {
                warn!(project_id, error = %e, "Knowledge store unavailable, continuing without it");
                context.source_errors.push(e.to_string());
            }
            None => {}
        }
        if let Some((d, errors)) = dynamic {
            context.dynamic_store = d;
            context.source_errors.extend(errors);
        }

        context.related_entities = find_related(raw, &context.structured_store);

        debug!(
            project_id,
            structured = context.structured_store.values().map(Vec::len).sum::<usize>(),
            similar = context.knowledge.total_count,
            dynamic_collections = context.dynamic_store.collections.len(),
            related = context.related_count(),
            source_errors = context.source_errors.len(),
            "Context gathered"
        );
        Ok(context)
    }

    /// Project record, cache-checked; falls back to a placeholder
    async fn resolve_project(&self, project_id: &str) -> (ProjectContext, Option<String>) {
        let key = CacheManager::project_key(project_id);
        if self.caching {
            match self.cache.get::<ProjectContext>(&key).await {
                Ok(Some(project)) => return (project, None),
                Ok(None) => {}
                Err(e) => warn!(project_id, error = %e, "Project cache read failed"),
            }
        }

        let fetched = self
            .structured
            .find_by_id(&self.config.project_collection, project_id)
            .await;
        let (project, error) = match fetched {
            Ok(Some(record)) => (ProjectContext::from_record(project_id, &record), None),
            Ok(None) => {
                debug!(project_id, "Project record not found, using placeholder");
                (ProjectContext::unknown(project_id), None)
            }
            Err(e) => {
                let err = source_error("project", e);
                warn!(project_id, error = %err, "Project lookup failed, using placeholder");
                return (ProjectContext::unknown(project_id), Some(err.to_string()));
            }
        };

        if self.caching {
            if let Err(e) = self
                .cache
                .set(&key, &project, self.cache.project_context_ttl())
                .await
            {
                warn!(project_id, error = %e, "Project cache write failed");
            }
        }
        (project, error)
    }

    /// All configured collections in parallel; per-collection failures absorbed
    async fn fetch_structured(
        &self,
        project_id: &str,
    ) -> (BTreeMap<String, Vec<Fields>>, Vec<String>) {
        let mut filter = Fields::new();
        filter.insert("project".into(), Value::from(project_id));

        let fetches = self.config.structured_collections.iter().map(|collection| {
            let filter = &filter;
            async move {
                let result = self
                    .structured
                    .find(collection, filter, self.config.structured_limit)
                    .await;
                (collection.clone(), result)
            }
        });

        let mut collections = BTreeMap::new();
        let mut errors = Vec::new();
        for (collection, result) in join_all(fetches).await {
            match result {
                Ok(docs) => {
                    collections.insert(collection, docs);
                }
                Err(e) => {
                    let err = source_error(&format!("structured:{}", collection), e);
                    warn!(project_id, error = %err, "Structured collection unavailable");
                    errors.push(err.to_string());
                    collections.insert(collection, vec![]);
                }
            }
        }
        (collections, errors)
    }

    async fn fetch_knowledge(&self, query: &str, project_id: &str) -> Result<KnowledgeContext> {
        if query.trim().is_empty() {
            return Ok(KnowledgeContext::default());
        }
        let similar = self
            .knowledge
            .search_similar(query, self.config.similar_content_limit, project_id)
            .await
            .map_err(|e| source_error("knowledge", e))?;
        Ok(KnowledgeContext {
            total_count: similar.len(),
            similar_content: similar,
        })
    }

    /// List collections, then sample the relevant ones in parallel
    async fn fetch_dynamic(&self, project_id: &str) -> (DynamicContext, Vec<String>) {
        let collections = match self.dynamic.list_collections(project_id).await {
            Ok(collections) => collections,
            Err(e) => {
                let err = source_error("dynamic", e);
                warn!(project_id, error = %err, "Dynamic store unavailable");
                return (DynamicContext::default(), vec![err.to_string()]);
            }
        };

        let relevant: Vec<String> = collections
            .into_iter()
            .filter(|c| !SYSTEM_COLLECTION_PREFIXES.iter().any(|p| c.starts_with(p)))
            .take(self.config.max_dynamic_collections)
            .collect();

        let empty = Fields::new();
        let samples = relevant.iter().map(|collection| {
            let empty = &empty;
            async move {
                let result = match self.dynamic.count_documents(project_id, collection).await {
                    Ok(0) => Ok(None),
                    Ok(_) => self
                        .dynamic
                        .find(project_id, collection, empty, self.config.dynamic_sample_size)
                        .await
                        .map(Some),
                    Err(e) => Err(e),
                };
                (collection.clone(), result)
            }
        });

        let mut context = DynamicContext {
            collections: relevant.clone(),
            per_collection_samples: BTreeMap::new(),
        };
        let mut errors = Vec::new();
        for (collection, result) in join_all(samples).await {
            match result {
                Ok(Some(docs)) => {
                    context.per_collection_samples.insert(collection, docs);
                }
                Ok(None) => debug!(project_id, collection = %collection, "Skipping empty collection"),
                Err(e) => {
                    let err = source_error(&format!("dynamic:{}", collection), e);
                    warn!(project_id, error = %err, "Dynamic collection sample failed");
                    errors.push(err.to_string());
                }
            }
        }
        (context, errors)
    }
}

fn source_error(source_name: &str, e: PrepError) -> PrepError {
    match e {
        already @ PrepError::ContextSource { .. } => already,
        other => PrepError::ContextSource {
            source_name: source_name.to_string(),
            message: other.to_string(),
        },
    }
}

fn doc_name(doc: &Fields) -> Option<&str> {
    doc.get("name")
        .or_else(|| doc.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Whether a field name denotes a reference: `*_id(s)`, `*Id(s)`, `*_ref`,
/// `*Ref`, or the singular or plural name of a context collection
fn is_reference_key<'a>(key: &str, mut collections: impl Iterator<Item = &'a String>) -> bool {
    let lower = key.to_ascii_lowercase();
    if lower == "id" || lower == "_id" {
        return false;
    }
    let id_shaped = ["_id", "_ids", "_ref", "_refs"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
        || ["Id", "Ids", "Ref", "Refs"]
            .iter()
            .any(|suffix| key.len() > suffix.len() && key.ends_with(suffix));
    id_shaped
        || collections.any(|c| {
            let singular = match c.strip_suffix("ies") {
                Some(stem) => format!("{}y", stem),
                None => c.strip_suffix('s').unwrap_or(c).to_string(),
            };
            lower == c.to_ascii_lowercase() || lower == singular.to_ascii_lowercase()
        })
}

/// Values of reference fields (ids or lists of ids)
fn reference_values(
    fields: &Fields,
    structured: &BTreeMap<String, Vec<Fields>>,
) -> Vec<(String, String)> {
    let mut refs = Vec::new();
    for (key, value) in fields {
        if !is_reference_key(key, structured.keys()) {
            continue;
        }
        match value {
            Value::Array(items) => {
                refs.extend(items.iter().filter_map(value_as_id).map(|id| (key.clone(), id)));
            }
            Value::Object(_) | Value::String(_) | Value::Number(_) => {
                if let Some(id) = value_as_id(value) {
                    refs.push((key.clone(), id));
                }
            }
            _ => {}
        }
    }
    refs
}

/// Match the raw entity's text and reference fields against context entities
pub fn find_related(
    raw: &RawEntity,
    structured: &BTreeMap<String, Vec<Fields>>,
) -> BTreeMap<String, Vec<RelatedEntity>> {
    let own_id = raw.source_id();
    let text_fields: Vec<(String, String)> = raw
        .text_fields()
        .into_iter()
        .map(|(k, v)| (k, v.to_lowercase()))
        .collect();
    let references = reference_values(&raw.to_fields(), structured);

    let mut related: BTreeMap<String, Vec<RelatedEntity>> = BTreeMap::new();
    for (collection, docs) in structured {
        for doc in docs {
            let Some(id) = doc.get("id").or_else(|| doc.get("_id")).and_then(value_as_id) else {
                continue;
            };
            if own_id.as_deref() == Some(id.as_str()) {
                continue;
            }

            let by_reference = references
                .iter()
                .find(|(key, value)| key != "id" && *value == id)
                .map(|(key, _)| key.clone());

            let by_name = doc_name(doc).and_then(|name| {
                let needle = name.to_lowercase();
                if needle.chars().count() < MIN_MATCH_LEN {
                    return None;
                }
                text_fields
                    .iter()
                    .find(|(key, text)| key != "name" && key != "title" && text.contains(&needle))
                    .map(|(key, _)| key.clone())
            });

            if let Some(matched_on) = by_reference.or(by_name) {
                related
                    .entry(collection.clone())
                    .or_default()
                    .push(RelatedEntity {
                        name: doc_name(doc).unwrap_or(&id).to_string(),
                        id,
                        collection: collection.clone(),
                        matched_on,
                    });
            }
        }
    }
    related
}
