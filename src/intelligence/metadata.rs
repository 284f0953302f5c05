//! Config-bound metadata generation
//!
//! One LLM call per entity covers every `use_llm` field of the entity's
//! config. The response is checked against a JSON schema built from the
//! field specs; anything missing or malformed falls back field by field to
//! the field's [`FieldFallback`]. Only a required field with no usable value
//! at all fails the stage.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::enricher::summarize_context;
use crate::config::{
    ConfigRegistry, EntityConfig, FieldFallback, FieldKind, MetadataFieldSpec, TemplateValues,
    TemplateVar,
};
use crate::error::{PrepError, Result};
use crate::llm::{object_schema, LlmClient, LlmRequest, OutputSchema};
use crate::types::{GatheredContext, GeneratedMetadata, RawEntity};

const SYSTEM_PROMPT: &str = "You prepare entities of a film production for a semantic \
knowledge base. Answer with a single JSON object and nothing else.";

const MAX_TOKENS: u32 = 800;

/// Result of the metadata stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataOutcome {
    pub metadata: GeneratedMetadata,
    pub tokens_used: u32,
    /// Fields whose value came from the LLM
    pub llm_fields: Vec<String>,
    /// Whether any LLM field had to be derived instead
    pub used_fallback: bool,
    /// Recovered problems (LLM failure, schema violations)
    pub errors: Vec<String>,
}

impl MetadataOutcome {
    /// Whether `summary` was produced by the LLM
    pub fn generated_summary(&self) -> bool {
        self.llm_fields.iter().any(|f| f == "summary")
    }
}

/// Generates metadata for raw entities
pub struct MetadataGenerator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ConfigRegistry>,
}

impl MetadataGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ConfigRegistry>) -> Self {
        Self { llm, registry }
    }

    /// Generate metadata using the registered config for `entity_type`
    pub async fn generate(
        &self,
        raw: &RawEntity,
        context: &GatheredContext,
        entity_type: &str,
    ) -> Result<MetadataOutcome> {
        let config = self.registry.resolve_type(entity_type);
        self.generate_with(raw, context, entity_type, &config).await
    }

    /// Generate metadata against an already resolved config
    pub async fn generate_with(
        &self,
        raw: &RawEntity,
        context: &GatheredContext,
        entity_type: &str,
        config: &EntityConfig,
    ) -> Result<MetadataOutcome> {
        let mut outcome = MetadataOutcome::default();

        let llm_specs: Vec<&MetadataFieldSpec> = if config.strategy.use_llm {
            config.llm_fields().collect()
        } else {
            vec![]
        };

        let mut supplied = Map::new();
        if !llm_specs.is_empty() {
            match self.call_llm(raw, context, entity_type, config, &llm_specs).await {
                Ok((values, tokens, problems)) => {
                    supplied = values;
                    outcome.tokens_used = tokens;
                    outcome.errors.extend(problems);
                }
                Err(e) => {
                    let err = PrepError::MetadataGeneration(e.to_string());
                    warn!(entity_type, error = %err, "LLM metadata failed, using fallbacks");
                    outcome.errors.push(err.to_string());
                }
            }
        }

        for spec in &config.metadata_fields {
            let from_llm = spec.use_llm
                && config.strategy.use_llm
                && supplied
                    .get(&spec.name)
                    .is_some_and(|v| spec.kind.matches(v) && !is_blank(v));

            let value = if from_llm {
                outcome.llm_fields.push(spec.name.clone());
                supplied.get(&spec.name).cloned()
            } else {
                if spec.use_llm && config.strategy.use_llm {
                    outcome.used_fallback = true;
                }
                derive_fallback(spec, raw)
            };

            match value {
                Some(value) => {
                    outcome.metadata.insert(spec.name.clone(), value);
                }
                None if spec.required => {
                    return Err(PrepError::MetadataGeneration(format!(
                        "required field '{}' could not be generated or derived",
                        spec.name
                    )));
                }
                None => {}
            }
        }

        debug!(
            entity_type,
            fields = outcome.metadata.len(),
            llm_fields = outcome.llm_fields.len(),
            used_fallback = outcome.used_fallback,
            tokens = outcome.tokens_used,
            "Metadata generated"
        );
        Ok(outcome)
    }

    /// Single structured call; returns accepted values, tokens and schema problems
    async fn call_llm(
        &self,
        raw: &RawEntity,
        context: &GatheredContext,
        entity_type: &str,
        config: &EntityConfig,
        specs: &[&MetadataFieldSpec],
    ) -> Result<(Map<String, Value>, u32, Vec<String>)> {
        let schema = OutputSchema::new(&format!("{}_metadata", config.kind.as_str()), field_schema(specs));
        let project = &context.project;
        let values = TemplateValues::new()
            .set(TemplateVar::EntityType, entity_type)
            .set(TemplateVar::EntityName, raw.name().unwrap_or("(unnamed)"))
            .set(TemplateVar::EntityText, raw.combined_text())
            .set(TemplateVar::ProjectName, project.name.as_str())
            .set(TemplateVar::ProjectGenre, project.genre.join(", "))
            .set(TemplateVar::ProjectTone, project.tone.as_str())
            .set(TemplateVar::ProjectThemes, project.themes.join(", "))
            .set(TemplateVar::ContextSummary, summarize_context(context))
            .set(TemplateVar::FieldSchema, describe_fields(specs));
        let prompt = config.prompts.metadata.render(&values)?;

        let mut request = LlmRequest::new(prompt)
            .with_context(SYSTEM_PROMPT)
            .with_schema(schema.clone());
        request.max_tokens = Some(MAX_TOKENS);

        let response = self.llm.execute(request).await?;
        let value = response.json()?;
        let Value::Object(object) = value else {
            return Err(PrepError::Llm("Metadata response is not an object".to_string()));
        };

        let problems = match schema.validate(&Value::Object(object.clone())) {
            Ok(()) => vec![],
            Err(problems) => {
                warn!(entity_type, problems = ?problems, "Metadata response failed schema checks");
                problems
                    .into_iter()
                    .map(|p| format!("metadata schema: {}", p))
                    .collect()
            }
        };
        Ok((object, response.tokens_used, problems))
    }
}

fn field_schema(specs: &[&MetadataFieldSpec]) -> Value {
    let mut properties = Map::new();
    for spec in specs {
        let mut prop = json!({
            "type": spec.kind.schema_type(),
            "description": spec.description,
        });
        if spec.kind == FieldKind::StringList {
            prop["items"] = json!({"type": "string"});
        }
        properties.insert(spec.name.clone(), prop);
    }
    let required = specs
        .iter()
        .filter(|s| s.required)
        .map(|s| s.name.clone())
        .collect();
    object_schema(properties, required)
}

fn describe_fields(specs: &[&MetadataFieldSpec]) -> String {
    specs
        .iter()
        .map(|s| {
            format!(
                "- {} ({}{}): {}",
                s.name,
                s.kind.schema_type(),
                if s.required { ", required" } else { "" },
                s.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Heuristic value for a field the LLM did not supply
pub fn derive_fallback(spec: &MetadataFieldSpec, raw: &RawEntity) -> Option<Value> {
    match &spec.fallback {
        FieldFallback::None => None,
        FieldFallback::TruncatedText { max_chars } => {
            let text = raw
                .description()
                .map(str::to_string)
                .unwrap_or_else(|| raw.combined_text());
            let text = truncate_text(&text, *max_chars);
            (!text.is_empty()).then(|| Value::from(text))
        }
        FieldFallback::SourceField { field } => {
            let value = raw.field(field)?;
            match (spec.kind, value) {
                (FieldKind::StringList, Value::String(s)) if !s.trim().is_empty() => {
                    Some(json!([s]))
                }
                (kind, value) if kind.matches(&value) && !is_blank(&value) => Some(value),
                _ => None,
            }
        }
        FieldFallback::Constant { value } => Some(value.clone()),
        FieldFallback::EmptyList => Some(json!([])),
    }
}

/// Cut `text` to at most `max_chars` characters, preferring a word boundary
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let cut: String = text.chars().take(max_chars - 3).collect();
    let cut = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > cut.len() / 2 => cut[..pos].trim_end().to_string(),
        _ => cut,
    };
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DisabledLlm, LlmResponse};
    use crate::types::{Fields, ProjectContext};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedLlm {
        response: Value,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.prompts.lock().unwrap().push(request.prompt);
            Ok(LlmResponse::structured(self.response.clone(), 42))
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn aladdin() -> RawEntity {
        let fields: Fields = json!({
            "id": "char_1",
            "name": "Aladdin",
            "description": "A street rat with a heart of gold",
            "role": "protagonist"
        })
        .as_object()
        .cloned()
        .unwrap();
        RawEntity::from_fields("character", fields)
    }

    fn context() -> GatheredContext {
        GatheredContext::empty(ProjectContext::unknown("proj_x"))
    }

    #[tokio::test]
    async fn test_llm_values_accepted() {
        let llm = Arc::new(FixedLlm {
            response: json!({
                "summary": "Aladdin is a resourceful street thief.",
                "keywords": ["thief", "agrabah"],
                "themes": ["freedom"],
                "archetype": "trickster",
                "traits": ["clever", "kind"],
                "role": "hero"
            }),
            prompts: Mutex::new(vec![]),
        });
        let generator = MetadataGenerator::new(llm.clone(), Arc::new(ConfigRegistry::with_defaults()));

        let outcome = generator.generate(&aladdin(), &context(), "character").await.unwrap();
        assert_eq!(outcome.metadata["archetype"], json!("trickster"));
        assert_eq!(outcome.tokens_used, 42);
        assert!(outcome.generated_summary());
        assert!(!outcome.used_fallback);
        assert!(llm.prompts.lock().unwrap()[0].contains("Aladdin"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let generator = MetadataGenerator::new(
            Arc::new(DisabledLlm),
            Arc::new(ConfigRegistry::with_defaults()),
        );
        let outcome = generator.generate(&aladdin(), &context(), "character").await.unwrap();

        assert_eq!(outcome.metadata["summary"], json!("A street rat with a heart of gold"));
        assert_eq!(outcome.metadata["role"], json!("protagonist"));
        assert_eq!(outcome.metadata["keywords"], json!([]));
        assert!(!outcome.metadata.contains_key("archetype"));
        assert!(outcome.used_fallback);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_wrongly_typed_field_falls_back() {
        let llm = Arc::new(FixedLlm {
            response: json!({"summary": 12, "keywords": "not-a-list"}),
            prompts: Mutex::new(vec![]),
        });
        let generator = MetadataGenerator::new(llm, Arc::new(ConfigRegistry::with_defaults()));
        let outcome = generator.generate(&aladdin(), &context(), "location").await.unwrap();

        assert!(outcome.metadata["summary"].is_string());
        assert_eq!(outcome.metadata["keywords"], json!([]));
        assert!(!outcome.errors.is_empty());
        assert!(outcome.llm_fields.is_empty());
    }

    #[tokio::test]
    async fn test_required_field_without_source_fails() {
        let generator = MetadataGenerator::new(
            Arc::new(DisabledLlm),
            Arc::new(ConfigRegistry::with_defaults()),
        );
        let empty = RawEntity::from_fields("prop", Fields::new());
        let err = generator.generate(&empty, &context(), "prop").await.unwrap_err();
        assert!(matches!(err, PrepError::MetadataGeneration(_)));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        let cut = truncate_text("the quick brown fox jumps over the lazy dog", 20);
        assert!(cut.chars().count() <= 20);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_text("ééééé", 4), "é...");
    }
}
