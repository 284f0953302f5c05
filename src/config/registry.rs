//! Per-entity-type configuration registry
//!
//! Each [`EntityKind`] maps to one [`EntityConfig`] describing required
//! fields, metadata to generate, relationship types to look for, validation
//! rules, prompts and the enrichment strategy. Configs are plain data
//! (serde-serializable); custom validation logic is referenced by name and
//! resolved against predicates registered on the registry.
//!
//! ## Invariants
//!
//! - Every registered config passed [`ConfigRegistry::register`] checks
//! - Every `pattern` rule has a compiled regex in the registry
//! - Every `custom` rule names a registered predicate

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::templates::PromptSet;
use crate::error::{PrepError, Result};
use crate::types::EntityKind;

/// Named predicate usable from `custom` validation rules
pub type CustomValidator = fn(&Value) -> bool;

// =============================================================================
// Config types
// =============================================================================

/// Sources the context gatherer may consult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Structured,
    Knowledge,
    Dynamic,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextSource::Structured => "structured",
            ContextSource::Knowledge => "knowledge",
            ContextSource::Dynamic => "dynamic",
        }
    }

    pub fn all() -> &'static [ContextSource] {
        &[
            ContextSource::Structured,
            ContextSource::Knowledge,
            ContextSource::Dynamic,
        ]
    }
}

/// How much context and LLM work an entity type receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentLevel {
    Minimal,
    #[default]
    Standard,
    Comprehensive,
}

impl EnrichmentLevel {
    /// Context sources this level allows
    pub fn sources(&self) -> &'static [ContextSource] {
        match self {
            EnrichmentLevel::Minimal => &[ContextSource::Structured],
            EnrichmentLevel::Standard => &[ContextSource::Structured, ContextSource::Knowledge],
            EnrichmentLevel::Comprehensive => ContextSource::all(),
        }
    }

    pub fn discovers_relationships(&self) -> bool {
        !matches!(self, EnrichmentLevel::Minimal)
    }
}

/// Enrichment strategy for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentStrategy {
    pub level: EnrichmentLevel,
    /// Whether LLM calls are made at all
    pub use_llm: bool,
    /// Threshold for relationship types that do not set their own
    pub min_confidence: f32,
    pub max_relationships: usize,
    /// Candidate entities offered to the relationship prompt
    pub candidate_limit: usize,
}

impl Default for EnrichmentStrategy {
    fn default() -> Self {
        Self {
            level: EnrichmentLevel::Standard,
            use_llm: true,
            min_confidence: 0.6,
            max_relationships: 10,
            candidate_limit: 30,
        }
    }
}

/// Value shape of a metadata field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    StringList,
    Object,
}

impl FieldKind {
    /// JSON schema type name
    pub fn schema_type(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::StringList => "array",
            FieldKind::Object => "object",
        }
    }

    /// Whether a JSON value has this shape
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::StringList => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
            FieldKind::Object => value.is_object(),
        }
    }
}

/// How to derive a field when the LLM does not supply it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldFallback {
    #[default]
    None,
    /// The entity's combined text, cut to `max_chars`
    TruncatedText { max_chars: usize },
    /// Copy a raw entity field
    SourceField { field: String },
    Constant { value: Value },
    EmptyList,
}

/// One metadata field to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub use_llm: bool,
    #[serde(default)]
    pub fallback: FieldFallback,
}

fn default_true() -> bool {
    true
}

impl MetadataFieldSpec {
    pub fn llm(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
            use_llm: true,
            fallback: FieldFallback::None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_fallback(mut self, fallback: FieldFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn derived(mut self) -> Self {
        self.use_llm = false;
        self
    }
}

/// A relationship type the discoverer may propose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeSpec {
    pub name: String,
    #[serde(default)]
    pub target_types: Vec<EntityKind>,
    #[serde(default)]
    pub description: String,
    /// Overrides the strategy threshold when set
    #[serde(default)]
    pub min_confidence: Option<f32>,
}

impl RelationshipTypeSpec {
    pub fn new(name: &str, target_types: &[EntityKind], description: &str) -> Self {
        Self {
            name: name.to_string(),
            target_types: target_types.to_vec(),
            description: description.to_string(),
            min_confidence: None,
        }
    }
}

/// Whether a failed rule blocks the write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// Rule type dispatch for entity-specific validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    MinLength { min: usize },
    MaxLength { max: usize },
    Pattern { pattern: String },
    Enum { values: Vec<String> },
    Custom { validator: String },
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::MinLength { .. } => "minLength",
            RuleKind::MaxLength { .. } => "maxLength",
            RuleKind::Pattern { .. } => "pattern",
            RuleKind::Enum { .. } => "enum",
            RuleKind::Custom { .. } => "custom",
        }
    }
}

/// One validation rule applied to a document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Top-level attribute or dotted metadata path
    pub field: String,
    pub rule: RuleKind,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn new(field: &str, rule: RuleKind, severity: Severity) -> Self {
        Self {
            field: field.to_string(),
            rule,
            severity,
            message: None,
        }
    }
}

/// Configuration for one entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub kind: EntityKind,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub optional_fields: Vec<String>,
    #[serde(default = "all_sources")]
    pub context_sources: Vec<ContextSource>,
    #[serde(default)]
    pub metadata_fields: Vec<MetadataFieldSpec>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipTypeSpec>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub prompts: PromptSet,
    #[serde(default)]
    pub strategy: EnrichmentStrategy,
}

fn all_sources() -> Vec<ContextSource> {
    ContextSource::all().to_vec()
}

impl EntityConfig {
    /// Default config for kinds without a dedicated entry
    pub fn generic(kind: EntityKind) -> Self {
        Self {
            kind,
            required_fields: vec![],
            optional_fields: vec!["name".into(), "description".into()],
            context_sources: all_sources(),
            metadata_fields: base_metadata_fields(),
            relationship_types: vec![RelationshipTypeSpec::new(
                "related_to",
                &[],
                "General association with another project entity",
            )],
            validation_rules: vec![],
            prompts: PromptSet::default(),
            strategy: EnrichmentStrategy::default(),
        }
    }

    /// Context sources after applying the enrichment level
    pub fn effective_sources(&self) -> Vec<ContextSource> {
        self.strategy
            .level
            .sources()
            .iter()
            .copied()
            .filter(|s| self.context_sources.contains(s))
            .collect()
    }

    /// Threshold for one relationship type
    pub fn threshold_for(&self, relationship_type: &str) -> Option<f32> {
        self.relationship_types
            .iter()
            .find(|r| r.name == relationship_type)
            .map(|r| r.min_confidence.unwrap_or(self.strategy.min_confidence))
    }

    pub fn llm_fields(&self) -> impl Iterator<Item = &MetadataFieldSpec> {
        self.metadata_fields.iter().filter(|f| f.use_llm)
    }
}

/// Fields every kind generates
fn base_metadata_fields() -> Vec<MetadataFieldSpec> {
    vec![
        MetadataFieldSpec::llm("summary", FieldKind::String, "One or two sentence summary")
            .required()
            .with_fallback(FieldFallback::TruncatedText { max_chars: 280 }),
        MetadataFieldSpec::llm("keywords", FieldKind::StringList, "Search keywords")
            .with_fallback(FieldFallback::EmptyList),
        MetadataFieldSpec::llm("themes", FieldKind::StringList, "Narrative themes touched")
            .with_fallback(FieldFallback::EmptyList),
    ]
}

fn character_config() -> EntityConfig {
    let mut fields = base_metadata_fields();
    fields.extend([
        MetadataFieldSpec::llm(
            "archetype",
            FieldKind::String,
            "Narrative archetype (hero, mentor, trickster, ...)",
        ),
        MetadataFieldSpec::llm("traits", FieldKind::StringList, "Core personality traits")
            .with_fallback(FieldFallback::EmptyList),
        MetadataFieldSpec::llm("role", FieldKind::String, "Role in the story")
            .with_fallback(FieldFallback::SourceField {
                field: "role".into(),
            }),
    ]);

    EntityConfig {
        kind: EntityKind::Character,
        required_fields: vec!["name".into()],
        optional_fields: vec![
            "description".into(),
            "personality".into(),
            "backstory".into(),
            "role".into(),
        ],
        context_sources: all_sources(),
        metadata_fields: fields,
        relationship_types: vec![
            RelationshipTypeSpec::new(
                "knows",
                &[EntityKind::Character],
                "Characters who know each other",
            ),
            RelationshipTypeSpec {
                min_confidence: Some(0.7),
                ..RelationshipTypeSpec::new(
                    "rivals",
                    &[EntityKind::Character],
                    "Characters in conflict",
                )
            },
            RelationshipTypeSpec::new(
                "appears_in",
                &[EntityKind::Scene, EntityKind::Episode],
                "Scenes or episodes featuring the character",
            ),
            RelationshipTypeSpec::new(
                "lives_in",
                &[EntityKind::Location],
                "The character's home or base",
            ),
        ],
        validation_rules: vec![
            ValidationRule::new("name", RuleKind::Required, Severity::Error),
            ValidationRule::new("name", RuleKind::MaxLength { max: 120 }, Severity::Error),
            ValidationRule::new(
                "summary",
                RuleKind::Custom {
                    validator: "no_placeholder".into(),
                },
                Severity::Warning,
            ),
        ],
        prompts: PromptSet::default(),
        strategy: EnrichmentStrategy {
            level: EnrichmentLevel::Comprehensive,
            ..EnrichmentStrategy::default()
        },
    }
}

fn scene_config() -> EntityConfig {
    let mut fields = base_metadata_fields();
    fields.extend([
        MetadataFieldSpec::llm("mood", FieldKind::String, "Dominant mood of the scene"),
        MetadataFieldSpec::llm("timeOfDay", FieldKind::String, "Time of day if stated"),
        MetadataFieldSpec::llm(
            "characters",
            FieldKind::StringList,
            "Names of characters present",
        )
        .with_fallback(FieldFallback::SourceField {
            field: "characters".into(),
        }),
    ]);

    EntityConfig {
        kind: EntityKind::Scene,
        required_fields: vec!["title".into()],
        optional_fields: vec![
            "description".into(),
            "location".into(),
            "characters".into(),
        ],
        context_sources: all_sources(),
        metadata_fields: fields,
        relationship_types: vec![
            RelationshipTypeSpec::new(
                "features",
                &[EntityKind::Character],
                "Characters appearing in the scene",
            ),
            RelationshipTypeSpec::new(
                "set_in",
                &[EntityKind::Location],
                "Where the scene takes place",
            ),
            RelationshipTypeSpec {
                min_confidence: Some(0.75),
                ..RelationshipTypeSpec::new(
                    "follows",
                    &[EntityKind::Scene],
                    "Scene that directly precedes this one",
                )
            },
        ],
        validation_rules: vec![ValidationRule::new(
            "mood",
            RuleKind::Enum {
                values: [
                    "tense", "joyful", "somber", "romantic", "comedic", "mysterious", "action",
                    "calm",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
            Severity::Warning,
        )],
        prompts: PromptSet::default(),
        strategy: EnrichmentStrategy {
            level: EnrichmentLevel::Comprehensive,
            ..EnrichmentStrategy::default()
        },
    }
}

fn location_config() -> EntityConfig {
    let mut fields = base_metadata_fields();
    fields.extend([
        MetadataFieldSpec::llm("setting", FieldKind::String, "interior or exterior"),
        MetadataFieldSpec::llm("atmosphere", FieldKind::String, "Sensory atmosphere")
            .with_fallback(FieldFallback::SourceField {
                field: "atmosphere".into(),
            }),
    ]);

    EntityConfig {
        kind: EntityKind::Location,
        required_fields: vec!["name".into()],
        optional_fields: vec!["description".into(), "atmosphere".into()],
        context_sources: vec![ContextSource::Structured, ContextSource::Knowledge],
        metadata_fields: fields,
        relationship_types: vec![RelationshipTypeSpec::new(
            "part_of",
            &[EntityKind::Location],
            "Larger location containing this one",
        )],
        validation_rules: vec![ValidationRule::new(
            "setting",
            RuleKind::Pattern {
                pattern: "^(?i)(interior|exterior|mixed)$".into(),
            },
            Severity::Warning,
        )],
        prompts: PromptSet::default(),
        strategy: EnrichmentStrategy::default(),
    }
}

// =============================================================================
// Built-in validators
// =============================================================================

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid regex"));

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(todo|tbd|lorem ipsum|placeholder)\b").expect("valid regex"));

fn non_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

fn slug(value: &Value) -> bool {
    value.as_str().map(|s| SLUG_PATTERN.is_match(s)).unwrap_or(false)
}

fn no_placeholder(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| !PLACEHOLDER_PATTERN.is_match(s))
        .unwrap_or(true)
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of entity configs and named validators
pub struct ConfigRegistry {
    configs: HashMap<EntityKind, EntityConfig>,
    validators: HashMap<String, CustomValidator>,
    patterns: HashMap<String, Regex>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ConfigRegistry {
    /// Empty registry with only the built-in validators
    pub fn new() -> Self {
        let mut validators: HashMap<String, CustomValidator> = HashMap::new();
        validators.insert("non_blank".into(), non_blank);
        validators.insert("slug".into(), slug);
        validators.insert("no_placeholder".into(), no_placeholder);

        Self {
            configs: HashMap::new(),
            validators,
            patterns: HashMap::new(),
        }
    }

    /// Registry with character, scene and location configs
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for config in [character_config(), scene_config(), location_config()] {
            if let Err(e) = registry.register(config) {
                // built-in configs are static; a failure here is a programming error
                tracing::error!("Built-in entity config rejected: {}", e);
            }
        }
        registry
    }

    /// Register a named predicate for `custom` rules
    pub fn register_validator(&mut self, name: &str, validator: CustomValidator) {
        self.validators.insert(name.to_string(), validator);
    }

    /// Validate and register a config, replacing any previous one
    pub fn register(&mut self, config: EntityConfig) -> Result<()> {
        let patterns = self.check(&config)?;
        debug!(
            kind = config.kind.as_str(),
            fields = config.metadata_fields.len(),
            rules = config.validation_rules.len(),
            "Registered entity config"
        );
        self.patterns.extend(patterns);
        self.configs.insert(config.kind, config);
        Ok(())
    }

    /// Register configs from a JSON array
    pub fn load_json(&mut self, json: &str) -> Result<usize> {
        let configs: Vec<EntityConfig> = serde_json::from_str(json)?;
        let count = configs.len();
        for config in configs {
            self.register(config)?;
        }
        Ok(count)
    }

    /// Config for a kind, or the generic default
    pub fn resolve(&self, kind: EntityKind) -> EntityConfig {
        self.configs
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| EntityConfig::generic(kind))
    }

    /// Config for an entity type name
    pub fn resolve_type(&self, entity_type: &str) -> EntityConfig {
        self.resolve(EntityKind::resolve(entity_type))
    }

    pub fn get(&self, kind: EntityKind) -> Option<&EntityConfig> {
        self.configs.get(&kind)
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<_> = self.configs.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn validator(&self, name: &str) -> Option<CustomValidator> {
        self.validators.get(name).copied()
    }

    /// Compiled regex for a registered `pattern` rule
    pub fn pattern(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    /// Serialize all registered configs
    pub fn to_json(&self) -> Result<String> {
        let configs: Vec<&EntityConfig> = self
            .kinds()
            .into_iter()
            .filter_map(|k| self.configs.get(&k))
            .collect();
        Ok(serde_json::to_string_pretty(&configs)?)
    }

    /// Registration checks; returns the patterns to compile
    fn check(&self, config: &EntityConfig) -> Result<Vec<(String, Regex)>> {
        let kind = config.kind.as_str();
        let fail = |msg: String| Err(PrepError::Config(format!("{} config: {}", kind, msg)));

        let mut seen = HashSet::new();
        for field in &config.metadata_fields {
            if field.name.trim().is_empty() {
                return fail("metadata field with empty name".into());
            }
            if !seen.insert(field.name.as_str()) {
                return fail(format!("duplicate metadata field '{}'", field.name));
            }
            if let FieldFallback::Constant { value } = &field.fallback {
                if !field.kind.matches(value) {
                    return fail(format!(
                        "constant fallback for '{}' is not a {}",
                        field.name,
                        field.kind.schema_type()
                    ));
                }
            }
        }

        let strategy = &config.strategy;
        if !(0.0..=1.0).contains(&strategy.min_confidence) {
            return fail("strategy min_confidence outside [0, 1]".into());
        }
        let mut rel_names = HashSet::new();
        for rel in &config.relationship_types {
            if !rel_names.insert(rel.name.as_str()) {
                return fail(format!("duplicate relationship type '{}'", rel.name));
            }
            if let Some(t) = rel.min_confidence {
                if !(0.0..=1.0).contains(&t) {
                    return fail(format!("threshold for '{}' outside [0, 1]", rel.name));
                }
            }
        }

        let mut patterns = Vec::new();
        for rule in &config.validation_rules {
            match &rule.rule {
                RuleKind::Pattern { pattern } => {
                    let regex = Regex::new(pattern)
                        .map_err(|e| PrepError::Config(format!("{} config: {}", kind, e)))?;
                    patterns.push((pattern.clone(), regex));
                }
                RuleKind::Custom { validator } if !self.validators.contains_key(validator) => {
                    return fail(format!("unknown custom validator '{}'", validator));
                }
                RuleKind::MinLength { min } => {
                    let max = config.validation_rules.iter().find_map(|r| match r.rule {
                        RuleKind::MaxLength { max } if r.field == rule.field => Some(max),
                        _ => None,
                    });
                    if max.is_some_and(|max| max < *min) {
                        return fail(format!("min length above max length on '{}'", rule.field));
                    }
                }
                _ => {}
            }
        }

        config.prompts.check()?;
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_registered() {
        let registry = ConfigRegistry::with_defaults();
        assert_eq!(
            registry.kinds(),
            vec![EntityKind::Character, EntityKind::Scene, EntityKind::Location]
        );
        assert!(registry.pattern("^(?i)(interior|exterior|mixed)$").is_some());
    }

    #[test]
    fn test_unknown_kind_gets_generic() {
        let registry = ConfigRegistry::with_defaults();
        let config = registry.resolve_type("prop");
        assert_eq!(config.kind, EntityKind::Generic);
        assert!(config.metadata_fields.iter().any(|f| f.name == "summary"));
    }

    #[test]
    fn test_unknown_custom_validator_rejected() {
        let mut registry = ConfigRegistry::new();
        let mut config = EntityConfig::generic(EntityKind::Concept);
        config.validation_rules.push(ValidationRule::new(
            "summary",
            RuleKind::Custom {
                validator: "is_haiku".into(),
            },
            Severity::Error,
        ));
        assert!(matches!(
            registry.register(config.clone()),
            Err(PrepError::Config(_))
        ));

        registry.register_validator("is_haiku", |_| true);
        registry.register(config).unwrap();
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut registry = ConfigRegistry::new();
        let mut config = EntityConfig::generic(EntityKind::Episode);
        config.validation_rules.push(ValidationRule::new(
            "summary",
            RuleKind::Pattern {
                pattern: "([unclosed".into(),
            },
            Severity::Error,
        ));
        assert!(registry.register(config).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut registry = ConfigRegistry::new();
        let mut config = EntityConfig::generic(EntityKind::Concept);
        config.relationship_types[0].min_confidence = Some(1.5);
        assert!(registry.register(config).is_err());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut registry = ConfigRegistry::new();
        let mut config = EntityConfig::generic(EntityKind::Concept);
        config.metadata_fields.push(MetadataFieldSpec::llm(
            "summary",
            FieldKind::String,
            "again",
        ));
        assert!(registry.register(config).is_err());
    }

    #[test]
    fn test_load_json() {
        let mut registry = ConfigRegistry::new();
        let json = json!([{
            "kind": "episode",
            "required_fields": ["title"],
            "metadata_fields": [
                {"name": "summary", "kind": "string", "required": true,
                 "fallback": {"type": "truncated_text", "max_chars": 100}}
            ],
            "validation_rules": [
                {"field": "summary", "rule": {"type": "min_length", "min": 20}, "severity": "warning"}
            ],
            "strategy": {"level": "minimal"}
        }])
        .to_string();

        assert_eq!(registry.load_json(&json).unwrap(), 1);
        let config = registry.get(EntityKind::Episode).unwrap();
        assert_eq!(config.strategy.level, EnrichmentLevel::Minimal);
        assert_eq!(config.effective_sources(), vec![ContextSource::Structured]);
        assert!(config.metadata_fields[0].use_llm);
    }

    #[test]
    fn test_registry_round_trips_through_json() {
        let registry = ConfigRegistry::with_defaults();
        let json = registry.to_json().unwrap();
        let mut other = ConfigRegistry::new();
        assert_eq!(other.load_json(&json).unwrap(), 3);
        assert_eq!(
            other.get(EntityKind::Scene),
            registry.get(EntityKind::Scene)
        );
    }

    #[test]
    fn test_threshold_resolution() {
        let config = ConfigRegistry::with_defaults().resolve(EntityKind::Character);
        assert_eq!(config.threshold_for("rivals"), Some(0.7));
        assert_eq!(config.threshold_for("knows"), Some(0.6));
        assert_eq!(config.threshold_for("married_to"), None);
    }

    #[test]
    fn test_builtin_validators() {
        assert!(slug(&json!("desert-tales")));
        assert!(!slug(&json!("Desert Tales")));
        assert!(!no_placeholder(&json!("TODO write this")));
        assert!(no_placeholder(&json!("A street rat with a heart of gold")));
        assert!(!non_blank(&json!("  ")));
    }
}
