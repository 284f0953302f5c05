//! CRUD lifecycle hooks
//!
//! Connects create/update/delete events of the surrounding content framework
//! to the [`BrainInterceptor`]. Create and update failures propagate so the
//! triggering write fails; delete cleanup failures are logged and swallowed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{PrepError, Result};
use crate::interceptor::{BrainInterceptor, PreparedWrite, StoreAck, StoreOptions};
use crate::types::{value_as_id, Fields, RawEntity};

/// Write operations that trigger preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
}

/// Hook adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Collections whose events are ignored entirely
    pub skip_collections: HashSet<String>,
    /// Record field holding the project reference
    pub project_id_field: String,
    /// Collection to entity type overrides
    pub entity_types: HashMap<String, String>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            skip_collections: ["media", "payload-preferences", "payload-migrations"]
                .into_iter()
                .map(String::from)
                .collect(),
            project_id_field: "project".to_string(),
            entity_types: HashMap::new(),
        }
    }
}

impl HookConfig {
    /// Entity type for a collection: override, else the singular collection name
    pub fn entity_type(&self, collection: &str) -> String {
        if let Some(kind) = self.entity_types.get(collection) {
            return kind.clone();
        }
        if let Some(stem) = collection.strip_suffix("ies") {
            format!("{}y", stem)
        } else if let Some(stem) = collection.strip_suffix('s') {
            stem.to_string()
        } else {
            collection.to_string()
        }
    }

    /// Project id from the configured field (id string or populated object),
    /// else the record's own id
    pub fn project_id(&self, record: &Fields) -> Option<String> {
        record
            .get(&self.project_id_field)
            .and_then(value_as_id)
            .or_else(|| record.get("id").and_then(value_as_id))
            .filter(|id| !id.trim().is_empty())
    }
}

pub struct HookAdapter {
    interceptor: Arc<BrainInterceptor>,
    config: HookConfig,
}

impl HookAdapter {
    pub fn new(interceptor: Arc<BrainInterceptor>, config: HookConfig) -> Self {
        Self {
            interceptor,
            config,
        }
    }

    pub fn handles(&self, collection: &str) -> bool {
        !self.config.skip_collections.contains(collection)
    }

    fn entity_and_options(&self, collection: &str, record: &Fields) -> Result<(RawEntity, StoreOptions)> {
        let entity_type = self.config.entity_type(collection);
        let options = StoreOptions {
            project_id: self.config.project_id(record).unwrap_or_default(),
            entity_type: entity_type.clone(),
            collection: Some(collection.to_string()),
            skip_cache: false,
        };
        if options.project_id.is_empty() && !self.interceptor.is_bypassed(&options) {
            return Err(PrepError::InvalidInput(format!(
                "{} record has no '{}' reference or id",
                collection, self.config.project_id_field
            )));
        }
        Ok((RawEntity::from_fields(&entity_type, record.clone()), options))
    }

    /// Phase one for a pending change; `None` for skipped collections
    pub async fn before_change(&self, collection: &str, record: &Fields) -> Result<Option<PreparedWrite>> {
        if !self.handles(collection) {
            return Ok(None);
        }
        let (raw, options) = self.entity_and_options(collection, record)?;
        self.interceptor.prepare_write(&raw, &options).await.map(Some)
    }

    /// Phase two once the framework's own write succeeded
    pub async fn commit_change(&self, write: &PreparedWrite) -> Result<StoreAck> {
        self.interceptor.commit(write).await
    }

    /// Undo a committed change after the framework's write failed
    pub async fn compensate(&self, ack: &StoreAck) -> Result<()> {
        match self.interceptor.rollback(ack).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(document_id = %ack.document_id, error = %e, "Compensating delete failed");
                Err(e)
            }
        }
    }

    /// After create/update: prepare and commit; errors fail the triggering write
    pub async fn after_change(
        &self,
        collection: &str,
        operation: ChangeOperation,
        record: &Fields,
    ) -> Result<Option<StoreAck>> {
        let Some(write) = self.before_change(collection, record).await.map_err(|e| {
            error!(collection, ?operation, error = %e, "Brain ingestion failed");
            e
        })?
        else {
            return Ok(None);
        };

        let ack = self.commit_change(&write).await.map_err(|e| {
            error!(collection, ?operation, error = %e, "Brain write failed");
            e
        })?;
        info!(collection, ?operation, document_id = %ack.document_id, "Record ingested");
        Ok(Some(ack))
    }

    /// After delete: remove the document; failures are only logged
    pub async fn after_delete(&self, collection: &str, record: &Fields) {
        if !self.handles(collection) {
            return;
        }
        let result = match self.entity_and_options(collection, record) {
            Ok((raw, options)) => self.interceptor.forget(&raw, &options).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(removed) => info!(collection, removed, "Record removed from brain"),
            Err(e) => warn!(collection, error = %e, "Brain cleanup failed, continuing with delete"),
        }
    }
}

/// Fields of a JSON object record
pub fn record_fields(value: Value) -> Result<Fields> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PrepError::InvalidInput(format!(
            "record must be a JSON object, got {}",
            match other {
                Value::Array(_) => "array",
                Value::String(_) => "string",
                Value::Number(_) => "number",
                Value::Bool(_) => "boolean",
                _ => "null",
            }
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        record_fields(value).unwrap()
    }

    #[test]
    fn test_entity_type_from_collection() {
        let mut config = HookConfig::default();
        assert_eq!(config.entity_type("characters"), "character");
        assert_eq!(config.entity_type("stories"), "story");
        assert_eq!(config.entity_type("media"), "media");
        config
            .entity_types
            .insert("cast".into(), "character".into());
        assert_eq!(config.entity_type("cast"), "character");
    }

    #[test]
    fn test_project_id_resolution() {
        let config = HookConfig::default();
        assert_eq!(
            config.project_id(&fields(json!({"id": "c1", "project": "proj_x"}))),
            Some("proj_x".into())
        );
        assert_eq!(
            config.project_id(&fields(json!({"id": "c1", "project": {"id": "proj_y", "name": "Y"}}))),
            Some("proj_y".into())
        );
        assert_eq!(
            config.project_id(&fields(json!({"id": "proj_z", "name": "Z"}))),
            Some("proj_z".into())
        );
        assert_eq!(config.project_id(&fields(json!({"name": "none"}))), None);
    }

    #[test]
    fn test_record_fields_rejects_non_objects() {
        assert!(record_fields(json!([1, 2])).is_err());
    }
}
