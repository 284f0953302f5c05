//! Core types for the preparation pipeline

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Free-form field map as it arrives from a collection
pub type Fields = serde_json::Map<String, Value>;

/// Field-name to value map produced by the metadata generator
pub type GeneratedMetadata = Fields;

/// Value written to `metadata.dataLineage.source` on every prepared document
pub const LINEAGE_SOURCE: &str = "data-preparation-agent";

/// Pipeline version recorded in lineage
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Entity kinds
// =============================================================================

/// Entity categories with a dedicated configuration shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Scene,
    Location,
    Episode,
    Concept,
    Project,
    /// Anything without a dedicated configuration
    Generic,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Scene => "scene",
            EntityKind::Location => "location",
            EntityKind::Episode => "episode",
            EntityKind::Concept => "concept",
            EntityKind::Project => "project",
            EntityKind::Generic => "generic",
        }
    }

    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Character,
            EntityKind::Scene,
            EntityKind::Location,
            EntityKind::Episode,
            EntityKind::Concept,
            EntityKind::Project,
            EntityKind::Generic,
        ]
    }

    /// Resolve an entity type name; unknown names map to `Generic`
    pub fn resolve(name: &str) -> Self {
        name.parse().unwrap_or(EntityKind::Generic)
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "character" | "characters" => Ok(EntityKind::Character),
            "scene" | "scenes" => Ok(EntityKind::Scene),
            "location" | "locations" => Ok(EntityKind::Location),
            "episode" | "episodes" => Ok(EntityKind::Episode),
            "concept" | "concepts" => Ok(EntityKind::Concept),
            "project" | "projects" => Ok(EntityKind::Project),
            "generic" => Ok(EntityKind::Generic),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

// =============================================================================
// Raw entities
// =============================================================================

/// Character record as stored in the characters collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// Scene record as stored in the scenes collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<String>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// Location record as stored in the locations collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atmosphere: Option<String>,
    #[serde(flatten)]
    pub extra: Fields,
}

/// An entity arriving from an external write.
///
/// Known shapes are parsed into typed records; everything else travels as
/// an opaque field map tagged with its declared type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RawEntity {
    Character(CharacterRecord),
    Scene(SceneRecord),
    Location(LocationRecord),
    Opaque { entity_type: String, fields: Fields },
}

/// Fields considered free text for matching and searchable text
const TEXT_FIELDS: &[&str] = &[
    "name",
    "title",
    "description",
    "role",
    "personality",
    "backstory",
    "atmosphere",
    "summary",
    "content",
    "synopsis",
    "notes",
];

impl RawEntity {
    /// Build an entity from a field map, parsing known shapes where possible
    pub fn from_fields(entity_type: &str, fields: Fields) -> Self {
        let value = Value::Object(fields);
        let parsed = match EntityKind::resolve(entity_type) {
            EntityKind::Character => serde_json::from_value(value.clone())
                .ok()
                .map(RawEntity::Character),
            EntityKind::Scene => serde_json::from_value(value.clone())
                .ok()
                .map(RawEntity::Scene),
            EntityKind::Location => serde_json::from_value(value.clone())
                .ok()
                .map(RawEntity::Location),
            _ => None,
        };

        parsed.unwrap_or_else(|| RawEntity::Opaque {
            entity_type: entity_type.to_string(),
            fields: match value {
                Value::Object(map) => map,
                _ => Fields::new(),
            },
        })
    }

    /// Build an entity from any JSON value; non-objects are rejected
    pub fn from_value(entity_type: &str, value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_fields(entity_type, map)),
            _ => None,
        }
    }

    /// Declared entity type name
    pub fn entity_type(&self) -> &str {
        match self {
            RawEntity::Character(_) => "character",
            RawEntity::Scene(_) => "scene",
            RawEntity::Location(_) => "location",
            RawEntity::Opaque { entity_type, .. } => entity_type,
        }
    }

    /// Source identifier, if the record carries one
    pub fn source_id(&self) -> Option<String> {
        let nonblank = |id: Option<String>| id.filter(|s| !s.trim().is_empty());
        let (id, extra) = match self {
            RawEntity::Character(r) => (r.id.clone(), &r.extra),
            RawEntity::Scene(r) => (r.id.clone(), &r.extra),
            RawEntity::Location(r) => (r.id.clone(), &r.extra),
            RawEntity::Opaque { fields, .. } => (fields.get("id").and_then(value_as_id), fields),
        };
        nonblank(id).or_else(|| nonblank(extra.get("_id").and_then(value_as_id)))
    }

    /// Display name of the entity
    pub fn name(&self) -> Option<&str> {
        match self {
            RawEntity::Character(r) => Some(r.name.as_str()),
            RawEntity::Scene(r) => Some(r.title.as_str()),
            RawEntity::Location(r) => Some(r.name.as_str()),
            RawEntity::Opaque { fields, .. } => fields
                .get("name")
                .or_else(|| fields.get("title"))
                .and_then(Value::as_str),
        }
        .filter(|s| !s.trim().is_empty())
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            RawEntity::Character(r) => r.description.as_deref(),
            RawEntity::Scene(r) => r.description.as_deref(),
            RawEntity::Location(r) => r.description.as_deref(),
            RawEntity::Opaque { fields, .. } => fields.get("description").and_then(Value::as_str),
        }
        .filter(|s| !s.trim().is_empty())
    }

    /// Flatten back into a field map
    pub fn to_fields(&self) -> Fields {
        let value = match self {
            RawEntity::Character(r) => serde_json::to_value(r),
            RawEntity::Scene(r) => serde_json::to_value(r),
            RawEntity::Location(r) => serde_json::to_value(r),
            RawEntity::Opaque { fields, .. } => return fields.clone(),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Fields::new(),
        }
    }

    /// Look up a single field by name
    pub fn field(&self, name: &str) -> Option<Value> {
        self.to_fields().get(name).cloned()
    }

    /// Non-empty free-text fields, in a stable order
    pub fn text_fields(&self) -> Vec<(String, String)> {
        let fields = self.to_fields();
        TEXT_FIELDS
            .iter()
            .filter_map(|key| {
                fields
                    .get(*key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| (key.to_string(), s.to_string()))
            })
            .collect()
    }

    /// All free text joined into one block
    pub fn combined_text(&self) -> String {
        self.text_fields()
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether the entity carries no fields at all
    pub fn is_empty(&self) -> bool {
        self.to_fields().is_empty()
    }

    /// Stable key identifying this entity: its source id, or a content hash
    pub fn source_key(&self) -> String {
        match self.source_id() {
            Some(id) => id,
            None => {
                // serde_json maps are ordered, so serialization is canonical
                let canonical = Value::Object(self.to_fields()).to_string();
                let digest = Sha256::digest(canonical.as_bytes());
                format!("gen_{}", &hex::encode(digest)[..16])
            }
        }
    }
}

/// Render an id-like JSON value as a string
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("id").and_then(value_as_id),
        _ => None,
    }
}

/// Deterministic document id for (entity type, source key, project)
pub fn document_id(entity_type: &str, source_key: &str, project_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(project_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", entity_type, &digest[..24])
}

// =============================================================================
// Gathered context
// =============================================================================

/// Project the entity belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(rename = "type", default)]
    pub project_type: String,
    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub status: String,
}

impl ProjectContext {
    /// Placeholder used when the project record cannot be loaded
    pub fn unknown(project_id: &str) -> Self {
        Self {
            id: project_id.to_string(),
            name: project_id.to_string(),
            slug: project_id.to_string(),
            project_type: String::new(),
            genre: vec![],
            themes: vec![],
            tone: String::new(),
            phase: String::new(),
            status: "unknown".to_string(),
        }
    }

    /// Build from a structured-store project record
    pub fn from_record(project_id: &str, record: &Fields) -> Self {
        let text = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let list = |key: &str| match record.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => vec![],
        };

        let name = text("name");
        let project_type = match text("projectType") {
            t if t.is_empty() => text("type"),
            t => t,
        };
        Self {
            id: project_id.to_string(),
            name: if name.is_empty() {
                project_id.to_string()
            } else {
                name
            },
            slug: text("slug"),
            project_type,
            genre: list("genre"),
            themes: list("themes"),
            tone: text("tone"),
            phase: text("phase"),
            status: text("status"),
        }
    }
}

/// Node returned by a knowledge-store similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarNode {
    pub id: String,
    pub node_type: String,
    pub content: String,
    pub score: f32,
}

/// Knowledge-store slice of the context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeContext {
    pub total_count: usize,
    pub similar_content: Vec<SimilarNode>,
}

/// Dynamic per-project store slice of the context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicContext {
    pub collections: Vec<String>,
    pub per_collection_samples: BTreeMap<String, Vec<Fields>>,
}

/// A context entity the raw entity refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntity {
    pub id: String,
    pub name: String,
    pub collection: String,
    /// Raw field whose text produced the match
    pub matched_on: String,
}

/// Everything gathered for one request; rebuilt per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatheredContext {
    pub project: ProjectContext,
    pub structured_store: BTreeMap<String, Vec<Fields>>,
    pub knowledge: KnowledgeContext,
    pub dynamic_store: DynamicContext,
    pub related_entities: BTreeMap<String, Vec<RelatedEntity>>,
    /// Per-source failures absorbed while gathering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_errors: Vec<String>,
}

impl GatheredContext {
    pub fn empty(project: ProjectContext) -> Self {
        Self {
            project,
            structured_store: BTreeMap::new(),
            knowledge: KnowledgeContext::default(),
            dynamic_store: DynamicContext::default(),
            related_entities: BTreeMap::new(),
            source_errors: vec![],
        }
    }

    pub fn related_count(&self) -> usize {
        self.related_entities.values().map(Vec::len).sum()
    }
}

// =============================================================================
// Pipeline outputs
// =============================================================================

/// Relationship proposed by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSuggestion {
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub target_id: String,
    #[serde(default)]
    pub target_type: String,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// Relationship as persisted on a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRelationship {
    #[serde(rename = "type", default)]
    pub relationship_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Fields::is_empty")]
    pub properties: Fields,
}

impl From<&RelationshipSuggestion> for DocumentRelationship {
    fn from(s: &RelationshipSuggestion) -> Self {
        let mut properties = Fields::new();
        properties.insert("targetType".into(), Value::from(s.target_type.clone()));
        properties.insert("confidence".into(), Value::from(f64::from(s.confidence)));
        if !s.reasoning.is_empty() {
            properties.insert("reasoning".into(), Value::from(s.reasoning.clone()));
        }
        Self {
            relationship_type: s.relationship_type.clone(),
            target: s.target_id.clone(),
            properties,
        }
    }
}

/// The only persisted output of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDocument {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: Fields,
    #[serde(default)]
    pub relationships: Vec<DocumentRelationship>,
}

impl EnrichedDocument {
    /// Look up a top-level attribute or a dotted metadata path
    pub fn lookup(&self, path: &str) -> Option<Value> {
        match path {
            "id" => Some(Value::from(self.id.clone())),
            "type" => Some(Value::from(self.doc_type.clone())),
            "project_id" | "projectId" => Some(Value::from(self.project_id.clone())),
            "text" => Some(Value::from(self.text.clone())),
            _ => {
                let path = path.strip_prefix("metadata.").unwrap_or(path);
                let mut parts = path.split('.');
                let first = parts.next()?;
                let mut current = self.metadata.get(first)?;
                for part in parts {
                    current = current.get(part)?;
                }
                Some(current.clone())
            }
        }
    }
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// Per-request measurements; logged, never persisted
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingMetrics {
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub tokens_used: u32,
    pub errors: Vec<String>,
}

// =============================================================================
// Request options
// =============================================================================

/// Options for a single `prepare` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareOptions {
    pub project_id: String,
    pub entity_type: String,
    /// Bypass the cache read path (results are still written through)
    #[serde(default)]
    pub skip_cache: bool,
    /// Collection the entity was written to, if known
    #[serde(default)]
    pub source_collection: Option<String>,
    /// Abort the request when it runs longer than this
    #[serde(default, with = "duration_ms_opt")]
    pub deadline: Option<Duration>,
}

impl PrepareOptions {
    pub fn new(project_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.source_collection = Some(collection.into());
        self
    }
}

/// One entry of a batch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareItem {
    pub entity: RawEntity,
    pub options: PrepareOptions,
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
