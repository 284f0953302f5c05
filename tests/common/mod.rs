//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use brainprep::agent::Preparer;
use brainprep::cache::CacheManager;
use brainprep::config::{CacheTtlConfig, ConfigRegistry, PipelineConfig};
use brainprep::error::{PrepError, Result};
use brainprep::llm::{LlmClient, LlmRequest, LlmResponse};
use brainprep::storage::{
    DynamicStore, InMemoryDynamicStore, InMemoryKnowledgeStore, InMemoryStructuredStore,
    KnowledgeStore, StructuredStore,
};
use brainprep::types::{
    EnrichedDocument, Fields, PrepareItem, PrepareOptions, RawEntity, SimilarNode,
};
use brainprep::{AgentDeps, DataPreparationAgent};

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

pub fn aladdin() -> RawEntity {
    RawEntity::from_fields(
        "character",
        fields(json!({
            "id": "char_1",
            "name": "Aladdin",
            "description": "A street rat from Agrabah who falls for Jasmine"
        })),
    )
}

pub fn character(id: &str, name: &str) -> RawEntity {
    RawEntity::from_fields(
        "character",
        fields(json!({
            "id": id,
            "name": name,
            "description": format!("{} wanders the markets of Agrabah", name)
        })),
    )
}

/// LLM double that answers by stage and counts calls.
///
/// Metadata summaries carry the call number so repeated generations are
/// distinguishable.
pub struct ScriptedLlm {
    pub metadata_calls: AtomicUsize,
    pub relationship_calls: AtomicUsize,
    relationships: Value,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::with_relationships(json!({"relationships": []}))
    }

    pub fn with_relationships(relationships: Value) -> Self {
        Self {
            metadata_calls: AtomicUsize::new(0),
            relationship_calls: AtomicUsize::new(0),
            relationships,
            delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst) + self.relationship_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let stage = request.schema.as_ref().map(|s| s.name.as_str()).unwrap_or("");
        if stage == "relationships" {
            self.relationship_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(LlmResponse::structured(self.relationships.clone(), 25));
        }

        let n = self.metadata_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LlmResponse::structured(
            json!({
                "summary": format!("Generated summary #{}", n),
                "keywords": ["agrabah", "thief"],
                "themes": ["freedom"],
                "archetype": "trickster",
                "traits": ["clever", "kind"],
                "role": "protagonist"
            }),
            100,
        ))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Knowledge store whose every call fails
pub struct FailingKnowledgeStore;

#[async_trait]
impl KnowledgeStore for FailingKnowledgeStore {
    async fn add_node(&self, _document: &EnrichedDocument) -> Result<()> {
        Err(PrepError::Storage("knowledge store rejected write".into()))
    }

    async fn search_similar(&self, _: &str, _: usize, _: &str) -> Result<Vec<SimilarNode>> {
        Err(PrepError::Storage("knowledge store unreachable".into()))
    }

    async fn get_node(&self, _id: &str) -> Result<Option<EnrichedDocument>> {
        Err(PrepError::Storage("knowledge store unreachable".into()))
    }

    async fn delete_node(&self, _id: &str) -> Result<bool> {
        Err(PrepError::Storage("knowledge store unreachable".into()))
    }
}

/// Structured store that fails every query for one project
pub struct PoisonedStructuredStore {
    pub inner: InMemoryStructuredStore,
    pub poisoned_project: String,
}

#[async_trait]
impl StructuredStore for PoisonedStructuredStore {
    async fn find(&self, collection: &str, filter: &Fields, limit: usize) -> Result<Vec<Fields>> {
        if filter.get("project").and_then(Value::as_str) == Some(self.poisoned_project.as_str()) {
            return Err(PrepError::Storage(format!("{} query timed out", collection)));
        }
        self.inner.find(collection, filter, limit).await
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        if id == self.poisoned_project {
            return Err(PrepError::Storage("project lookup failed".into()));
        }
        self.inner.find_by_id(collection, id).await
    }
}

/// Which dynamic store call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicFailure {
    List,
    Count,
    Find,
}

/// Dynamic store with one `props` collection whose chosen call fails
pub struct FailingDynamicStore(pub DynamicFailure);

#[async_trait]
impl DynamicStore for FailingDynamicStore {
    async fn list_collections(&self, _project_id: &str) -> Result<Vec<String>> {
        match self.0 {
            DynamicFailure::List => Err(PrepError::Storage("dynamic store offline".into())),
            _ => Ok(vec!["props".to_string()]),
        }
    }

    async fn find(&self, _: &str, _: &str, _: &Fields, _: usize) -> Result<Vec<Fields>> {
        match self.0 {
            DynamicFailure::Find => Err(PrepError::Storage("cursor timed out".into())),
            _ => Ok(vec![fields(json!({"name": "Lamp"}))]),
        }
    }

    async fn count_documents(&self, _: &str, _: &str) -> Result<u64> {
        match self.0 {
            DynamicFailure::Count => Err(PrepError::Storage("count rejected".into())),
            _ => Ok(1),
        }
    }
}

/// Preparer that counts calls and delegates to an agent
pub struct CountingPreparer {
    pub inner: Arc<DataPreparationAgent>,
    pub prepare_calls: AtomicUsize,
}

impl CountingPreparer {
    pub fn new(inner: Arc<DataPreparationAgent>) -> Self {
        Self {
            inner,
            prepare_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Preparer for CountingPreparer {
    async fn prepare(&self, raw: &RawEntity, options: &PrepareOptions) -> Result<EnrichedDocument> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.prepare(raw, options).await
    }

    async fn prepare_batch(&self, items: Vec<PrepareItem>) -> Vec<Result<EnrichedDocument>> {
        self.prepare_calls.fetch_add(items.len(), Ordering::SeqCst);
        self.inner.prepare_batch(items).await
    }

    async fn invalidate(&self, project_id: &str, entity_type: &str, source_key: &str) -> Result<()> {
        Preparer::invalidate(self.inner.as_ref(), project_id, entity_type, source_key).await
    }
}

/// Project and neighbours for `proj_x`
pub fn seeded_structured() -> InMemoryStructuredStore {
    let store = InMemoryStructuredStore::new();
    store.insert(
        "projects",
        fields(json!({
            "id": "proj_x",
            "name": "Desert Tales",
            "projectType": "movie",
            "genre": ["adventure", "fantasy"],
            "tone": "whimsical"
        })),
    );
    store.insert(
        "characters",
        fields(json!({"id": "char_2", "project": "proj_x", "name": "Jasmine"})),
    );
    store.insert(
        "locations",
        fields(json!({"id": "loc_1", "project": "proj_x", "name": "Agrabah"})),
    );
    store
}

pub struct Harness {
    pub agent: Arc<DataPreparationAgent>,
    pub llm: Arc<ScriptedLlm>,
    pub knowledge: Arc<InMemoryKnowledgeStore>,
}

pub fn harness(config: PipelineConfig) -> Harness {
    harness_with(config, ScriptedLlm::new(), Arc::new(seeded_structured()))
}

pub fn harness_with(
    config: PipelineConfig,
    llm: ScriptedLlm,
    structured: Arc<dyn StructuredStore>,
) -> Harness {
    harness_full(config, llm, structured, Arc::new(InMemoryDynamicStore::new()))
}

pub fn harness_full(
    config: PipelineConfig,
    llm: ScriptedLlm,
    structured: Arc<dyn StructuredStore>,
    dynamic: Arc<dyn DynamicStore>,
) -> Harness {
    let llm = Arc::new(llm);
    let knowledge = Arc::new(InMemoryKnowledgeStore::new());
    let deps = AgentDeps {
        llm: llm.clone(),
        structured,
        knowledge: knowledge.clone(),
        dynamic,
        cache: Arc::new(CacheManager::in_memory(CacheTtlConfig::default())),
        registry: Arc::new(ConfigRegistry::with_defaults()),
    };
    let agent = DataPreparationAgent::new(deps, config).expect("valid pipeline config");
    Harness {
        agent: Arc::new(agent),
        llm,
        knowledge,
    }
}

pub fn no_cache() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.features.enable_caching = false;
    config
}
