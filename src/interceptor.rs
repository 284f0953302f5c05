//! Single ingress in front of the knowledge store
//!
//! Writes for bypass collections go straight to the store; everything else
//! is prepared by the pipeline first. Writes are two-phase: [`prepare_write`]
//! has no side effects on the knowledge store, [`commit`] performs the single
//! upsert, and [`rollback`] is the compensating delete.
//!
//! [`prepare_write`]: BrainInterceptor::prepare_write
//! [`commit`]: BrainInterceptor::commit
//! [`rollback`]: BrainInterceptor::rollback

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agent::Preparer;
use crate::error::{PrepError, Result};
use crate::storage::KnowledgeStore;
use crate::types::{document_id, EnrichedDocument, PrepareItem, PrepareOptions, RawEntity};

/// Options for one interceptor write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOptions {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub entity_type: String,
    /// Source collection; decides bypass
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub skip_cache: bool,
}

impl StoreOptions {
    pub fn new(project_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn from_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Entity type the pipeline resolves for `raw`, trimmed
    fn entity_type_for<'a>(&'a self, raw: &'a RawEntity) -> &'a str {
        match self.entity_type.trim() {
            "" => raw.entity_type().trim(),
            t => t,
        }
    }

    fn project(&self) -> &str {
        self.project_id.trim()
    }

    fn prepare_options(&self) -> PrepareOptions {
        let mut options = PrepareOptions::new(self.project_id.clone(), self.entity_type.clone())
            .skip_cache(self.skip_cache);
        options.source_collection = self.collection.clone();
        options
    }
}

/// A document ready to commit
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWrite {
    pub document: EnrichedDocument,
    pub bypassed: bool,
}

/// Acknowledgement of a committed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAck {
    pub document_id: String,
    pub bypassed: bool,
}

pub struct BrainInterceptor {
    preparer: Arc<dyn Preparer>,
    knowledge: Arc<dyn KnowledgeStore>,
    bypass: HashSet<String>,
}

impl BrainInterceptor {
    pub fn new(
        preparer: Arc<dyn Preparer>,
        knowledge: Arc<dyn KnowledgeStore>,
        bypass_collections: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            preparer,
            knowledge,
            bypass: bypass_collections.into_iter().collect(),
        }
    }

    pub fn is_bypassed(&self, options: &StoreOptions) -> bool {
        options
            .collection
            .as_deref()
            .is_some_and(|c| self.bypass.contains(c))
    }

    /// Phase one: build (and for pipeline items, enrich and validate) the document
    pub async fn prepare_write(&self, raw: &RawEntity, options: &StoreOptions) -> Result<PreparedWrite> {
        if self.is_bypassed(options) {
            return Ok(PreparedWrite {
                document: passthrough(raw, options),
                bypassed: true,
            });
        }
        let document = self.preparer.prepare(raw, &options.prepare_options()).await?;
        Ok(PreparedWrite {
            document,
            bypassed: false,
        })
    }

    /// Phase two: the single knowledge-store upsert
    pub async fn commit(&self, write: &PreparedWrite) -> Result<StoreAck> {
        self.knowledge
            .add_node(&write.document)
            .await
            .map_err(|e| match e {
                e @ PrepError::Storage(_) => e,
                other => PrepError::Storage(other.to_string()),
            })?;
        debug!(
            document_id = %write.document.id,
            bypassed = write.bypassed,
            "Knowledge store write"
        );
        Ok(StoreAck {
            document_id: write.document.id.clone(),
            bypassed: write.bypassed,
        })
    }

    /// Prepare then commit
    pub async fn store(&self, raw: &RawEntity, options: &StoreOptions) -> Result<StoreAck> {
        let write = self.prepare_write(raw, options).await?;
        self.commit(&write).await
    }

    /// Store many entities; one result per item in input order
    pub async fn store_batch(&self, items: Vec<(RawEntity, StoreOptions)>) -> Vec<Result<StoreAck>> {
        let total = items.len();
        let mut writes: Vec<Option<Result<PreparedWrite>>> = (0..total).map(|_| None).collect();

        let mut pipeline_slots = Vec::new();
        let mut pipeline_items = Vec::new();
        for (i, (raw, options)) in items.into_iter().enumerate() {
            if self.is_bypassed(&options) {
                writes[i] = Some(Ok(PreparedWrite {
                    document: passthrough(&raw, &options),
                    bypassed: true,
                }));
            } else {
                pipeline_slots.push(i);
                pipeline_items.push(PrepareItem {
                    options: options.prepare_options(),
                    entity: raw,
                });
            }
        }

        let bypassed = total - pipeline_items.len();
        let prepared = self.preparer.prepare_batch(pipeline_items).await;
        for (slot, result) in pipeline_slots.into_iter().zip(prepared) {
            writes[slot] = Some(result.map(|document| PreparedWrite {
                document,
                bypassed: false,
            }));
        }

        let results: Vec<Result<StoreAck>> = join_all(writes.into_iter().map(|write| async move {
            match write {
                Some(Ok(write)) => self.commit(&write).await,
                Some(Err(e)) => Err(e),
                None => Err(PrepError::Internal("batch item produced no result".to_string())),
            }
        }))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, bypassed, failed, "Batch stored");
        results
    }

    /// Compensating delete for a committed write
    pub async fn rollback(&self, ack: &StoreAck) -> Result<bool> {
        let removed = self.knowledge.delete_node(&ack.document_id).await?;
        if !removed {
            warn!(document_id = %ack.document_id, "Rollback found no document to remove");
        }
        Ok(removed)
    }

    /// Remove an entity's document and cached preparation
    pub async fn forget(&self, raw: &RawEntity, options: &StoreOptions) -> Result<bool> {
        let entity_type = options.entity_type_for(raw);
        let source_key = raw.source_key();
        let id = document_id(entity_type, &source_key, options.project());
        let removed = self.knowledge.delete_node(&id).await?;
        if !self.is_bypassed(options) {
            self.preparer
                .invalidate(options.project(), entity_type, &source_key)
                .await?;
        }
        debug!(document_id = %id, removed, "Entity forgotten");
        Ok(removed)
    }
}

/// Untouched document for bypass collections
fn passthrough(raw: &RawEntity, options: &StoreOptions) -> EnrichedDocument {
    let entity_type = options.entity_type_for(raw);
    let fields = raw.to_fields();
    let text = match raw.combined_text() {
        t if t.is_empty() => Value::Object(fields.clone()).to_string(),
        t => t,
    };
    let mut metadata = fields;
    metadata.insert(
        "dataLineage".into(),
        json!({
            "source": "bypass",
            "sourceId": raw.source_id(),
            "entityType": entity_type,
            "collection": options.collection,
        }),
    );

    EnrichedDocument {
        id: document_id(entity_type, &raw.source_key(), options.project()),
        doc_type: entity_type.to_string(),
        project_id: options.project().to_string(),
        text,
        metadata,
        relationships: vec![],
    }
}
