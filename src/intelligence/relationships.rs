//! Relationship discovery
//!
//! Offers the LLM a bounded list of nearby entities and keeps only the
//! suggestions that name a configured relationship type, point at an
//! offered candidate and clear that type's confidence threshold.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{EntityConfig, TemplateValues, TemplateVar};
use crate::error::{PrepError, Result};
use crate::llm::{LlmClient, LlmRequest, OutputSchema};
use crate::types::{value_as_id, EntityKind, GatheredContext, RelationshipSuggestion};

const SYSTEM_PROMPT: &str = "You link entities of a film production knowledge base. \
Only use the candidate ids you are given. Answer with JSON only.";

/// An entity the LLM may link to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub entity_type: String,
}

/// Result of the relationship stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryOutcome {
    pub relationships: Vec<RelationshipSuggestion>,
    pub tokens_used: u32,
    /// Set when discovery failed and an empty list was substituted
    pub error: Option<String>,
}

pub struct RelationshipDiscoverer {
    llm: Arc<dyn LlmClient>,
}

impl RelationshipDiscoverer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Suggest relationships for `text`; failures yield an empty list
    pub async fn discover(
        &self,
        text: &str,
        context: &GatheredContext,
        project_id: &str,
        config: &EntityConfig,
    ) -> DiscoveryOutcome {
        if config.relationship_types.is_empty() || !config.strategy.use_llm {
            return DiscoveryOutcome::default();
        }
        let candidates = collect_candidates(context, config.strategy.candidate_limit);
        if candidates.is_empty() {
            debug!(project_id, "No relationship candidates in context");
            return DiscoveryOutcome::default();
        }

        match self.suggest(text, context, config, &candidates).await {
            Ok((suggestions, tokens_used)) => {
                let offered = suggestions.len();
                let relationships = filter_suggestions(suggestions, &candidates, config);
                debug!(
                    project_id,
                    offered,
                    kept = relationships.len(),
                    "Relationships discovered"
                );
                DiscoveryOutcome {
                    relationships,
                    tokens_used,
                    error: None,
                }
            }
            Err(e) => {
                let err = PrepError::RelationshipDiscovery(e.to_string());
                warn!(project_id, error = %err, "Relationship discovery failed, continuing without");
                DiscoveryOutcome {
                    relationships: vec![],
                    tokens_used: 0,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn suggest(
        &self,
        text: &str,
        context: &GatheredContext,
        config: &EntityConfig,
        candidates: &[Candidate],
    ) -> Result<(Vec<RelationshipSuggestion>, u32)> {
        let types = config
            .relationship_types
            .iter()
            .map(|r| {
                let targets: Vec<&str> = r.target_types.iter().map(EntityKind::as_str).collect();
                if targets.is_empty() {
                    format!("- {}: {}", r.name, r.description)
                } else {
                    format!("- {} (-> {}): {}", r.name, targets.join("|"), r.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let listed = candidates
            .iter()
            .map(|c| format!("- {} [{}] {}", c.id, c.entity_type, c.name))
            .collect::<Vec<_>>()
            .join("\n");

        let values = TemplateValues::new()
            .set(TemplateVar::EntityType, config.kind.as_str())
            .set(TemplateVar::EntityText, text)
            .set(TemplateVar::ProjectName, context.project.name.as_str())
            .set(TemplateVar::RelationshipTypes, types)
            .set(TemplateVar::Candidates, listed);
        let prompt = config.prompts.relationships.render(&values)?;

        let request = LlmRequest::new(prompt)
            .with_context(SYSTEM_PROMPT)
            .with_schema(OutputSchema::new("relationships", suggestion_schema()));
        let response = self.llm.execute(request).await?;
        let value = response.json()?;

        let items = match value.get("relationships") {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Err(PrepError::Llm(
                    "Relationship response has no 'relationships' array".to_string(),
                ))
            }
        };
        let suggestions = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RelationshipSuggestion>(item).ok())
            .collect();
        Ok((suggestions, response.tokens_used))
    }
}

fn suggestion_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string"},
                        "targetId": {"type": "string"},
                        "targetType": {"type": "string"},
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["type", "targetId", "confidence"]
                }
            }
        },
        "required": ["relationships"]
    })
}

/// Kind name for a collection such as `characters`
fn collection_kind(collection: &str) -> String {
    match collection.parse::<EntityKind>() {
        Ok(kind) => kind.as_str().to_string(),
        Err(_) => collection.trim_end_matches('s').to_string(),
    }
}

/// Related entities first, then the rest of the structured store, then similar nodes
pub fn collect_candidates(context: &GatheredContext, limit: usize) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut push = |candidate: Candidate| {
        if candidates.len() < limit && seen.insert(candidate.id.clone()) {
            candidates.push(candidate);
        }
    };

    for (collection, related) in &context.related_entities {
        for entity in related {
            push(Candidate {
                id: entity.id.clone(),
                name: entity.name.clone(),
                entity_type: collection_kind(collection),
            });
        }
    }
    for (collection, docs) in &context.structured_store {
        for doc in docs {
            let Some(id) = doc.get("id").and_then(value_as_id) else {
                continue;
            };
            let name = doc
                .get("name")
                .or_else(|| doc.get("title"))
                .and_then(Value::as_str)
                .unwrap_or(&id)
                .to_string();
            push(Candidate {
                id,
                name,
                entity_type: collection_kind(collection),
            });
        }
    }
    for node in &context.knowledge.similar_content {
        push(Candidate {
            id: node.id.clone(),
            name: node.content.chars().take(80).collect(),
            entity_type: node.node_type.clone(),
        });
    }
    candidates
}

/// Threshold, target and type filtering; dedup by (type, target); cap
pub fn filter_suggestions(
    suggestions: Vec<RelationshipSuggestion>,
    candidates: &[Candidate],
    config: &EntityConfig,
) -> Vec<RelationshipSuggestion> {
    let by_id: HashMap<&str, &Candidate> = candidates.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut best: HashMap<(String, String), RelationshipSuggestion> = HashMap::new();
    for mut suggestion in suggestions {
        let Some(threshold) = config.threshold_for(&suggestion.relationship_type) else {
            continue;
        };
        if !suggestion.confidence.is_finite()
            || suggestion.confidence > 1.0
            || suggestion.confidence < threshold
        {
            continue;
        }
        let Some(candidate) = by_id.get(suggestion.target_id.as_str()) else {
            continue;
        };

        let allowed = config
            .relationship_types
            .iter()
            .find(|r| r.name == suggestion.relationship_type)
            .map(|r| r.target_types.as_slice())
            .unwrap_or_default();
        let candidate_kind = candidate.entity_type.parse::<EntityKind>().ok();
        if !allowed.is_empty() && candidate_kind.is_some_and(|k| !allowed.contains(&k)) {
            continue;
        }
        if suggestion.target_type.trim().is_empty() {
            suggestion.target_type = candidate.entity_type.clone();
        }

        let key = (
            suggestion.relationship_type.clone(),
            suggestion.target_id.clone(),
        );
        match best.get(&key) {
            Some(existing) if existing.confidence >= suggestion.confidence => {}
            _ => {
                best.insert(key, suggestion);
            }
        }
    }

    let mut kept: Vec<RelationshipSuggestion> = best.into_values().collect();
    kept.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.relationship_type.cmp(&b.relationship_type))
            .then_with(|| a.target_id.cmp(&b.target_id))
    });
    kept.truncate(config.strategy.max_relationships);
    kept
}
