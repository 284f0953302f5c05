//! Pipeline configuration
//!
//! - [`PipelineConfig`]: feature flags, TTLs, queue and gatherer settings
//! - [`registry`]: per-entity-type configuration
//! - [`templates`]: typed prompt templates

pub mod registry;
pub mod templates;

pub use registry::{
    ConfigRegistry, ContextSource, CustomValidator, EnrichmentLevel, EnrichmentStrategy,
    EntityConfig, FieldFallback, FieldKind, MetadataFieldSpec, RelationshipTypeSpec, RuleKind,
    Severity, ValidationRule,
};
pub use templates::{PromptSet, PromptTemplate, TemplateValues, TemplateVar};

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Optional pipeline stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineFeatures {
    pub enable_caching: bool,
    pub enable_relationship_discovery: bool,
    pub enable_validation: bool,
}

impl Default for PipelineFeatures {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_relationship_discovery: true,
            enable_validation: true,
        }
    }
}

/// Cache time-to-live classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    /// Project context entries (default: 5 minutes)
    pub project_context_ttl_secs: u64,
    /// Prepared documents (default: 1 hour)
    pub document_ttl_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            project_context_ttl_secs: 300,
            document_ttl_secs: 3600,
        }
    }
}

/// Async job queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Buffered jobs before `add` is rejected
    pub capacity: usize,
    /// Worker tasks
    pub concurrency: usize,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before retry n is `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
    /// How long completed and failed statuses stay queryable
    pub status_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 1000,
            status_ttl_secs: 3600,
        }
    }
}

/// Context gathering limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GathererConfig {
    pub similar_content_limit: usize,
    pub structured_limit: usize,
    pub dynamic_sample_size: usize,
    pub max_dynamic_collections: usize,
    pub structured_collections: Vec<String>,
    pub project_collection: String,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            similar_content_limit: 5,
            structured_limit: 20,
            dynamic_sample_size: 3,
            max_dynamic_collections: 10,
            structured_collections: vec![
                "characters".into(),
                "scenes".into(),
                "locations".into(),
            ],
            project_collection: "projects".into(),
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: PipelineFeatures,
    pub cache: CacheTtlConfig,
    pub queue: QueueConfig,
    pub gatherer: GathererConfig,
    /// Items of one batch processed at the same time
    pub batch_concurrency: usize,
    /// Deadline applied when a request does not set its own
    pub default_deadline_ms: Option<u64>,
    /// Collections written straight to the knowledge store
    pub bypass_collections: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            features: PipelineFeatures::default(),
            cache: CacheTtlConfig::default(),
            queue: QueueConfig::default(),
            gatherer: GathererConfig::default(),
            batch_concurrency: 8,
            default_deadline_ms: None,
            bypass_collections: vec!["users".into()],
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `BRAINPREP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values from a lookup function (environment in production)
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| PrepError::Config(format!("Invalid value for {}: '{}'", key, raw)))
        }
        fn list(raw: &str) -> Vec<String> {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }

        macro_rules! overlay {
            ($key:literal => $target:expr) => {
                if let Some(raw) = lookup($key) {
                    $target = parse($key, &raw)?;
                }
            };
        }

        overlay!("BRAINPREP_ENABLE_CACHING" => self.features.enable_caching);
        overlay!("BRAINPREP_ENABLE_RELATIONSHIPS" => self.features.enable_relationship_discovery);
        overlay!("BRAINPREP_ENABLE_VALIDATION" => self.features.enable_validation);
        overlay!("BRAINPREP_PROJECT_CONTEXT_TTL" => self.cache.project_context_ttl_secs);
        overlay!("BRAINPREP_DOCUMENT_TTL" => self.cache.document_ttl_secs);
        overlay!("BRAINPREP_QUEUE_CAPACITY" => self.queue.capacity);
        overlay!("BRAINPREP_QUEUE_CONCURRENCY" => self.queue.concurrency);
        overlay!("BRAINPREP_QUEUE_MAX_RETRIES" => self.queue.max_retries);
        overlay!("BRAINPREP_QUEUE_BACKOFF_MS" => self.queue.retry_backoff_ms);
        overlay!("BRAINPREP_QUEUE_STATUS_TTL" => self.queue.status_ttl_secs);
        overlay!("BRAINPREP_SIMILAR_LIMIT" => self.gatherer.similar_content_limit);
        overlay!("BRAINPREP_STRUCTURED_LIMIT" => self.gatherer.structured_limit);
        overlay!("BRAINPREP_DYNAMIC_SAMPLE_SIZE" => self.gatherer.dynamic_sample_size);
        overlay!("BRAINPREP_BATCH_CONCURRENCY" => self.batch_concurrency);

        if let Some(raw) = lookup("BRAINPREP_DEADLINE_MS") {
            self.default_deadline_ms = match raw.trim() {
                "" | "0" => None,
                value => Some(parse("BRAINPREP_DEADLINE_MS", value)?),
            };
        }
        if let Some(raw) = lookup("BRAINPREP_BYPASS_COLLECTIONS") {
            self.bypass_collections = list(&raw);
        }
        if let Some(raw) = lookup("BRAINPREP_STRUCTURED_COLLECTIONS") {
            self.gatherer.structured_collections = list(&raw);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings that would stall the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.queue.concurrency == 0 {
            return Err(PrepError::Config("queue concurrency must be at least 1".into()));
        }
        if self.queue.capacity == 0 {
            return Err(PrepError::Config("queue capacity must be at least 1".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(PrepError::Config("batch concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.features.enable_caching);
        assert_eq!(config.cache.project_context_ttl_secs, 300);
        assert_eq!(config.cache.document_ttl_secs, 3600);
        assert_eq!(config.bypass_collections, vec!["users".to_string()]);
        config.validate().unwrap();
    }

    #[test]
    fn test_overlay() {
        let config = PipelineConfig::default()
            .overlay(lookup(&[
                ("BRAINPREP_ENABLE_CACHING", "false"),
                ("BRAINPREP_QUEUE_MAX_RETRIES", "5"),
                ("BRAINPREP_BYPASS_COLLECTIONS", "users, media ,"),
                ("BRAINPREP_DEADLINE_MS", "2500"),
            ]))
            .unwrap();
        assert!(!config.features.enable_caching);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(
            config.bypass_collections,
            vec!["users".to_string(), "media".to_string()]
        );
        assert_eq!(config.default_deadline_ms, Some(2500));
    }

    #[test]
    fn test_overlay_rejects_garbage() {
        let err = PipelineConfig::default()
            .overlay(lookup(&[("BRAINPREP_DOCUMENT_TTL", "an hour")]))
            .unwrap_err();
        assert!(matches!(err, PrepError::Config(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = PipelineConfig::default()
            .overlay(lookup(&[("BRAINPREP_QUEUE_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }
}
