//! Data enrichment and quality scoring
//!
//! Merges the raw entity, its gathered context and generated metadata into
//! searchable text, a context summary and a quality score.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::metadata::MetadataOutcome;
use crate::types::{GatheredContext, GeneratedMetadata, RawEntity};

/// Rubric weight per satisfied signal
const SIGNAL_WEIGHT: f32 = 0.2;

/// Metadata fields needed for the breadth signal
const BREADTH_THRESHOLD: usize = 4;

/// Related names listed per collection in the summary
const SUMMARY_NAMES: usize = 5;

/// Inputs to the quality rubric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySignals {
    pub has_name: bool,
    pub has_description: bool,
    /// Non-blank metadata fields
    pub metadata_fields: usize,
    /// Summary produced by the LLM rather than a fallback
    pub generated_summary: bool,
    pub relationships: usize,
}

impl QualitySignals {
    /// Fixed weighted rubric, capped at 1.0
    pub fn score(&self) -> f32 {
        let signals = [
            self.has_name,
            self.has_description,
            self.metadata_fields >= BREADTH_THRESHOLD,
            self.generated_summary,
            self.relationships >= 1,
        ];
        let score = signals.iter().filter(|s| **s).count() as f32 * SIGNAL_WEIGHT;
        score.min(1.0)
    }
}

/// Output of the enrichment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRepresentation {
    pub searchable_text: String,
    pub context_summary: String,
    pub quality_score: f32,
    pub signals: QualitySignals,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataEnricher;

impl DataEnricher {
    pub fn new() -> Self {
        Self
    }

    pub fn enrich(
        &self,
        raw: &RawEntity,
        context: &GatheredContext,
        metadata: &MetadataOutcome,
    ) -> EnrichedRepresentation {
        let signals = QualitySignals {
            has_name: raw.name().is_some(),
            has_description: raw.description().is_some(),
            metadata_fields: metadata
                .metadata
                .values()
                .filter(|v| !is_empty_value(v))
                .count(),
            generated_summary: metadata.generated_summary(),
            relationships: 0,
        };

        EnrichedRepresentation {
            searchable_text: searchable_text(raw, context, &metadata.metadata),
            context_summary: summarize_context(context),
            quality_score: signals.score(),
            signals,
        }
    }

    /// Recompute the score once relationships are known
    pub fn rescore(&self, repr: &mut EnrichedRepresentation, relationships: usize) {
        repr.signals.relationships = relationships;
        repr.quality_score = repr.signals.score();
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Text indexed by the knowledge store
fn searchable_text(raw: &RawEntity, context: &GatheredContext, metadata: &GeneratedMetadata) -> String {
    let mut lines = Vec::new();
    let kind = capitalize(raw.entity_type());
    match raw.name() {
        Some(name) => lines.push(format!("{}: {}", kind, name)),
        None => lines.push(kind),
    }

    for (key, value) in raw.text_fields() {
        if key == "name" || key == "title" {
            continue;
        }
        lines.push(value);
    }

    if let Some(summary) = metadata.get("summary").and_then(Value::as_str) {
        if !lines.iter().any(|l| l == summary) {
            lines.push(format!("Summary: {}", summary));
        }
    }
    for (label, key) in [("Keywords", "keywords"), ("Themes", "themes"), ("Traits", "traits")] {
        let items = string_list(metadata.get(key));
        if !items.is_empty() {
            lines.push(format!("{}: {}", label, items.join(", ")));
        }
    }

    let project = &context.project;
    if !project.name.is_empty() {
        lines.push(format!("Project: {}", project.name));
    }
    lines.join("\n")
}

/// Human-readable digest of the gathered context
pub fn summarize_context(context: &GatheredContext) -> String {
    let project = &context.project;
    let mut details = Vec::new();
    if !project.project_type.is_empty() {
        details.push(project.project_type.clone());
    }
    if !project.genre.is_empty() {
        details.push(format!("genre: {}", project.genre.join(", ")));
    }
    if !project.tone.is_empty() {
        details.push(format!("tone: {}", project.tone));
    }
    if !project.phase.is_empty() {
        details.push(format!("phase: {}", project.phase));
    }

    let mut parts = vec![if details.is_empty() {
        format!("Project: {}.", project.name)
    } else {
        format!("Project: {} ({}).", project.name, details.join("; "))
    }];

    if !project.themes.is_empty() {
        parts.push(format!("Themes: {}.", project.themes.join(", ")));
    }

    let related: Vec<String> = context
        .related_entities
        .iter()
        .filter(|(_, entities)| !entities.is_empty())
        .map(|(collection, entities)| {
            let names: Vec<&str> = entities
                .iter()
                .take(SUMMARY_NAMES)
                .map(|e| e.name.as_str())
                .collect();
            format!("{}: {}", collection, names.join(", "))
        })
        .collect();
    if !related.is_empty() {
        parts.push(format!("Related: {}.", related.join("; ")));
    }

    if context.knowledge.total_count > 0 {
        parts.push(format!(
            "Similar content: {} items.",
            context.knowledge.total_count
        ));
    }
    if !context.dynamic_store.collections.is_empty() {
        parts.push(format!(
            "Dynamic collections: {}.",
            context.dynamic_store.collections.join(", ")
        ));
    }
    parts.join(" ")
}
