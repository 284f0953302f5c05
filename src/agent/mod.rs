//! Data preparation agent
//!
//! Orchestrates one request through the pipeline:
//!
//! ```text
//! ValidateInput -> CacheCheck -> GatherContext -> GenerateMetadata -> Enrich
//!   -> [DiscoverRelationships] -> BuildDocument -> [Validate] -> [CacheStore]
//! ```
//!
//! Stages run strictly in order and any stage error aborts the request.
//! `prepare` never writes to the knowledge store; `commit` does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheManager;
use crate::config::{ConfigRegistry, EntityConfig, PipelineConfig};
use crate::context::ContextGatherer;
use crate::error::{PrepError, Result};
use crate::intelligence::{
    DataEnricher, EnrichedRepresentation, MetadataGenerator, MetadataOutcome,
    RelationshipDiscoverer, Validator,
};
use crate::llm::LlmClient;
use crate::queue::{JobHandler, JobStatus, QueueManager, QueuedJob};
use crate::storage::{DynamicStore, KnowledgeStore, StructuredStore};
use crate::types::{
    document_id, DocumentRelationship, EnrichedDocument, GatheredContext, PrepareItem,
    PrepareOptions, ProcessingMetrics, RawEntity, RelationshipSuggestion, LINEAGE_SOURCE,
    PIPELINE_VERSION,
};

/// Queue job name for asynchronous preparation
pub const PREPARE_JOB: &str = "prepare-entity";

/// Pipeline stage, used in logs and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateInput,
    CacheCheck,
    GatherContext,
    GenerateMetadata,
    Enrich,
    DiscoverRelationships,
    BuildDocument,
    Validate,
    CacheStore,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ValidateInput => "validate_input",
            Stage::CacheCheck => "cache_check",
            Stage::GatherContext => "gather_context",
            Stage::GenerateMetadata => "generate_metadata",
            Stage::Enrich => "enrich",
            Stage::DiscoverRelationships => "discover_relationships",
            Stage::BuildDocument => "build_document",
            Stage::Validate => "validate",
            Stage::CacheStore => "cache_store",
        }
    }
}

/// Something that turns raw entities into documents
#[async_trait]
pub trait Preparer: Send + Sync {
    async fn prepare(&self, raw: &RawEntity, options: &PrepareOptions) -> Result<EnrichedDocument>;

    /// One result per item, in input order
    async fn prepare_batch(&self, items: Vec<PrepareItem>) -> Vec<Result<EnrichedDocument>>;

    /// Drop any cached document for an entity
    async fn invalidate(&self, _project_id: &str, _entity_type: &str, _source_key: &str) -> Result<()> {
        Ok(())
    }
}

/// Cached document plus a fingerprint of the raw entity it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedDocument {
    fingerprint: String,
    document: EnrichedDocument,
}

fn fingerprint(raw: &RawEntity) -> String {
    let canonical = Value::Object(raw.to_fields()).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// External collaborators the agent is built from
pub struct AgentDeps {
    pub llm: Arc<dyn LlmClient>,
    pub structured: Arc<dyn StructuredStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub dynamic: Arc<dyn DynamicStore>,
    pub cache: Arc<CacheManager>,
    pub registry: Arc<ConfigRegistry>,
}

pub struct DataPreparationAgent {
    config: PipelineConfig,
    registry: Arc<ConfigRegistry>,
    gatherer: ContextGatherer,
    metadata: MetadataGenerator,
    relationships: RelationshipDiscoverer,
    enricher: DataEnricher,
    validator: Validator,
    cache: Arc<CacheManager>,
    knowledge: Arc<dyn KnowledgeStore>,
    queue: QueueManager,
}

impl DataPreparationAgent {
    pub fn new(deps: AgentDeps, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let gatherer = ContextGatherer::new(
            deps.structured,
            deps.knowledge.clone(),
            deps.dynamic,
            deps.cache.clone(),
            config.gatherer.clone(),
        )
        .with_caching(config.features.enable_caching);

        info!(
            model = deps.llm.model_name(),
            caching = config.features.enable_caching,
            relationships = config.features.enable_relationship_discovery,
            validation = config.features.enable_validation,
            "Data preparation agent ready"
        );

        Ok(Self {
            queue: QueueManager::new(config.queue.clone()),
            metadata: MetadataGenerator::new(deps.llm.clone(), deps.registry.clone()),
            relationships: RelationshipDiscoverer::new(deps.llm),
            enricher: DataEnricher::new(),
            validator: Validator::new(deps.registry.clone()),
            registry: deps.registry,
            cache: deps.cache,
            knowledge: deps.knowledge,
            gatherer,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.queue.status(job_id)
    }

    /// Run the pipeline for one entity
    #[instrument(skip(self, raw, options), fields(project_id = %options.project_id, entity_type = %options.entity_type))]
    pub async fn prepare(&self, raw: &RawEntity, options: &PrepareOptions) -> Result<EnrichedDocument> {
        let started = Instant::now();
        let mut metrics = ProcessingMetrics::default();

        let deadline = options
            .deadline
            .or_else(|| self.config.default_deadline_ms.map(Duration::from_millis));
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, self.run(raw, options, &mut metrics))
                .await
                .unwrap_or_else(|_| Err(PrepError::Timeout(limit.as_millis() as u64))),
            None => self.run(raw, options, &mut metrics).await,
        };

        metrics.duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(doc) => info!(
                document_id = %doc.id,
                duration_ms = metrics.duration_ms,
                cache_hit = metrics.cache_hit,
                tokens_used = metrics.tokens_used,
                recovered = metrics.errors.len(),
                "Document prepared"
            ),
            Err(e) => {
                metrics.errors.push(e.to_string());
                warn!(
                    duration_ms = metrics.duration_ms,
                    tokens_used = metrics.tokens_used,
                    kind = e.kind().as_str(),
                    errors = ?metrics.errors,
                    "Preparation failed"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        raw: &RawEntity,
        options: &PrepareOptions,
        metrics: &mut ProcessingMetrics,
    ) -> Result<EnrichedDocument> {
        // ValidateInput
        let entity_type = match options.entity_type.trim() {
            "" => raw.entity_type().trim().to_string(),
            t => t.to_string(),
        };
        let config = self.registry.resolve_type(&entity_type);
        self.validator.check_input(raw, options, &config)?;
        let project_id = options.project_id.trim();
        let source_key = raw.source_key();
        let id = document_id(&entity_type, &source_key, project_id);
        stage_done(Stage::ValidateInput, &id);

        // CacheCheck
        let caching = self.config.features.enable_caching;
        let cache_key = CacheManager::key(project_id, &entity_type, &source_key);
        let print = fingerprint(raw);
        if caching && !options.skip_cache {
            match self.cache.get::<CachedDocument>(&cache_key).await {
                Ok(Some(cached)) if cached.fingerprint == print => {
                    metrics.cache_hit = true;
                    debug!(document_id = %id, "Serving prepared document from cache");
                    return Ok(cached.document);
                }
                Ok(Some(_)) => debug!(document_id = %id, "Cached document is stale"),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Cache read failed, preparing from scratch");
                    metrics.errors.push(e.to_string());
                }
            }
        }
        stage_done(Stage::CacheCheck, &id);

        // GatherContext
        let context = self
            .gatherer
            .gather(raw, project_id, &config.effective_sources())
            .await?;
        metrics.errors.extend(context.source_errors.iter().cloned());
        stage_done(Stage::GatherContext, &id);

        // GenerateMetadata
        let outcome = self
            .metadata
            .generate_with(raw, &context, &entity_type, &config)
            .await?;
        metrics.tokens_used += outcome.tokens_used;
        metrics.errors.extend(outcome.errors.iter().cloned());
        stage_done(Stage::GenerateMetadata, &id);

        // Enrich
        let mut repr = self.enricher.enrich(raw, &context, &outcome);
        stage_done(Stage::Enrich, &id);

        // DiscoverRelationships
        let mut relationships = vec![];
        if self.config.features.enable_relationship_discovery
            && config.strategy.level.discovers_relationships()
        {
            let discovered = self
                .relationships
                .discover(&repr.searchable_text, &context, project_id, &config)
                .await;
            metrics.tokens_used += discovered.tokens_used;
            metrics.errors.extend(discovered.error);
            let own_id = raw.source_id();
            relationships = discovered
                .relationships
                .into_iter()
                .filter(|r| Some(&r.target_id) != own_id.as_ref() && r.target_id != id)
                .collect();
            self.enricher.rescore(&mut repr, relationships.len());
            stage_done(Stage::DiscoverRelationships, &id);
        }

        // BuildDocument
        let document = build_document(
            id,
            &entity_type,
            project_id,
            raw,
            &config,
            &context,
            outcome,
            &repr,
            &relationships,
        );
        stage_done(Stage::BuildDocument, &document.id);

        // Validate
        if self.config.features.enable_validation {
            let result = self.validator.ensure_valid(&document)?;
            if !result.warnings.is_empty() {
                debug!(
                    document_id = %document.id,
                    warnings = ?result.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "Document has validation warnings"
                );
            }
            stage_done(Stage::Validate, &document.id);
        }

        // CacheStore
        if caching {
            let entry = CachedDocument {
                fingerprint: print,
                document: document.clone(),
            };
            if let Err(e) = self
                .cache
                .set(&cache_key, &entry, self.cache.document_ttl())
                .await
            {
                warn!(document_id = %document.id, error = %e, "Cache write failed");
                metrics.errors.push(e.to_string());
            }
            stage_done(Stage::CacheStore, &document.id);
        }

        Ok(document)
    }

    /// Enqueue preparation and commit; returns the job id immediately
    pub async fn prepare_async(&self, raw: RawEntity, options: PrepareOptions) -> Result<String> {
        if options.project_id.trim().is_empty() {
            return Err(PrepError::InvalidInput("projectId is required".to_string()));
        }
        let payload = serde_json::to_value(PrepareItem {
            entity: raw,
            options,
        })?;
        self.queue.add(PREPARE_JOB, payload).await
    }

    /// Prepare items concurrently; results keep input order
    pub async fn prepare_batch(&self, items: Vec<PrepareItem>) -> Vec<Result<EnrichedDocument>> {
        let total = items.len();
        let results: Vec<Result<EnrichedDocument>> = stream::iter(items)
            .map(|item| async move { self.prepare(&item.entity, &item.options).await })
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, failed, "Batch prepared");
        results
    }

    /// Write a prepared document to the knowledge store (upsert by id)
    pub async fn commit(&self, document: &EnrichedDocument) -> Result<()> {
        self.knowledge.add_node(document).await.map_err(|e| match e {
            e @ PrepError::Storage(_) => e,
            other => PrepError::Storage(other.to_string()),
        })?;
        debug!(document_id = %document.id, "Document committed");
        Ok(())
    }

    /// Spawn queue workers that prepare and commit queued entities
    pub fn start_queue_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let handler: Arc<dyn JobHandler> = self.clone();
        self.queue.start_workers(handler)
    }

    /// Drop the cached document for an entity
    pub async fn invalidate_cached(
        &self,
        project_id: &str,
        entity_type: &str,
        source_key: &str,
    ) -> Result<bool> {
        self.cache
            .invalidate(&CacheManager::key(project_id, entity_type, source_key))
            .await
    }
}

fn stage_done(stage: Stage, document_id: &str) {
    debug!(stage = stage.as_str(), document_id, "Stage complete");
}

#[allow(clippy::too_many_arguments)]
fn build_document(
    id: String,
    entity_type: &str,
    project_id: &str,
    raw: &RawEntity,
    config: &EntityConfig,
    context: &GatheredContext,
    outcome: MetadataOutcome,
    repr: &EnrichedRepresentation,
    relationships: &[RelationshipSuggestion],
) -> EnrichedDocument {
    let mut metadata = outcome.metadata;

    for field in ["name", "title", "description"] {
        if let Some(value) = raw.field(field) {
            metadata.entry(field.to_string()).or_insert(value);
        }
    }
    for field in config.required_fields.iter().chain(&config.optional_fields) {
        if let Some(value) = raw.field(field) {
            metadata.entry(field.clone()).or_insert(value);
        }
    }

    metadata.insert(
        "dataLineage".into(),
        json!({
            "source": LINEAGE_SOURCE,
            "sourceId": raw.source_id(),
            "entityType": entity_type,
            "processedAt": Utc::now().to_rfc3339(),
            "version": PIPELINE_VERSION,
            "llmFields": outcome.llm_fields,
            "usedFallback": outcome.used_fallback,
        }),
    );
    metadata.insert("qualityScore".into(), json!(repr.quality_score));
    metadata.insert("contextSummary".into(), json!(repr.context_summary));
    if !context.project.name.is_empty() {
        metadata.insert("projectName".into(), json!(context.project.name));
    }

    EnrichedDocument {
        id,
        doc_type: entity_type.to_string(),
        project_id: project_id.to_string(),
        text: repr.searchable_text.clone(),
        metadata,
        relationships: relationships.iter().map(DocumentRelationship::from).collect(),
    }
}

#[async_trait]
impl Preparer for DataPreparationAgent {
    async fn prepare(&self, raw: &RawEntity, options: &PrepareOptions) -> Result<EnrichedDocument> {
        DataPreparationAgent::prepare(self, raw, options).await
    }

    async fn prepare_batch(&self, items: Vec<PrepareItem>) -> Vec<Result<EnrichedDocument>> {
        DataPreparationAgent::prepare_batch(self, items).await
    }

    async fn invalidate(&self, project_id: &str, entity_type: &str, source_key: &str) -> Result<()> {
        self.invalidate_cached(project_id, entity_type, source_key)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl JobHandler for DataPreparationAgent {
    async fn handle(&self, job: &QueuedJob) -> Result<String> {
        if job.name != PREPARE_JOB {
            return Err(PrepError::Queue(format!("Unknown job: {}", job.name)));
        }
        let item: PrepareItem = serde_json::from_value(job.payload.clone())?;
        let document = self.prepare(&item.entity, &item.options).await?;
        self.commit(&document).await?;
        Ok(document.id)
    }
}
