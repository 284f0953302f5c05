//! Document validation
//!
//! Structural checks apply to every document; entity-specific rules come
//! from the document type's [`EntityConfig`] and are dispatched by rule
//! kind. A rule's severity decides whether its failure blocks the write.

use std::borrow::Cow;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::config::{ConfigRegistry, EntityConfig, RuleKind, Severity, ValidationRule};
use crate::error::{PrepError, Result};
use crate::types::{EnrichedDocument, PrepareOptions, RawEntity, ValidationIssue, ValidationResult};

/// Text length outside this range only warns
pub const MIN_TEXT_CHARS: usize = 10;
pub const MAX_TEXT_CHARS: usize = 10_000;

pub struct Validator {
    registry: Arc<ConfigRegistry>,
}

impl Validator {
    pub fn new(registry: Arc<ConfigRegistry>) -> Self {
        Self { registry }
    }

    /// Request checks made before any I/O
    pub fn check_input(
        &self,
        raw: &RawEntity,
        options: &PrepareOptions,
        config: &EntityConfig,
    ) -> Result<()> {
        if options.project_id.trim().is_empty() {
            return Err(PrepError::InvalidInput("projectId is required".to_string()));
        }
        if options.entity_type.trim().is_empty() && raw.entity_type().trim().is_empty() {
            return Err(PrepError::InvalidInput("entityType is required".to_string()));
        }
        if raw.is_empty() {
            return Err(PrepError::InvalidInput("entity has no fields".to_string()));
        }

        let missing: Vec<&str> = config
            .required_fields
            .iter()
            .filter(|f| raw.field(f).map(|v| is_missing(&v)).unwrap_or(true))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PrepError::InvalidInput(format!(
                "{} entity is missing required fields: {}",
                config.kind.as_str(),
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn validate(&self, doc: &EnrichedDocument) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (field, value) in [
            ("id", &doc.id),
            ("type", &doc.doc_type),
            ("project_id", &doc.project_id),
            ("text", &doc.text),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationIssue::new(field, "is required"));
            }
        }

        let chars = doc.text.chars().count();
        if !doc.text.trim().is_empty() && chars < MIN_TEXT_CHARS {
            warnings.push(ValidationIssue::new(
                "text",
                format!("is shorter than {} characters", MIN_TEXT_CHARS),
            ));
        }
        if chars > MAX_TEXT_CHARS {
            warnings.push(ValidationIssue::new(
                "text",
                format!("is longer than {} characters", MAX_TEXT_CHARS),
            ));
        }
        if doc.metadata.is_empty() {
            warnings.push(ValidationIssue::new("metadata", "is empty"));
        }
        if doc.relationships.is_empty() {
            warnings.push(ValidationIssue::new("relationships", "none discovered"));
        }
        for (i, rel) in doc.relationships.iter().enumerate() {
            if rel.relationship_type.trim().is_empty() {
                errors.push(ValidationIssue::new(
                    format!("relationships[{}].type", i),
                    "is required",
                ));
            }
            if rel.target.trim().is_empty() {
                errors.push(ValidationIssue::new(
                    format!("relationships[{}].target", i),
                    "is required",
                ));
            }
        }

        if !doc.doc_type.trim().is_empty() {
            let config = self.registry.resolve_type(&doc.doc_type);
            for rule in &config.validation_rules {
                if let Some(issue) = self.apply_rule(rule, doc) {
                    match rule.severity {
                        Severity::Error => errors.push(issue),
                        Severity::Warning => warnings.push(issue),
                    }
                }
            }
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate and turn blocking errors into a [`PrepError`]
    pub fn ensure_valid(&self, doc: &EnrichedDocument) -> Result<ValidationResult> {
        let result = self.validate(doc);
        if result.valid {
            Ok(result)
        } else {
            Err(PrepError::DocumentValidation {
                errors: result.errors.iter().map(ToString::to_string).collect(),
            })
        }
    }

    fn apply_rule(&self, rule: &ValidationRule, doc: &EnrichedDocument) -> Option<ValidationIssue> {
        let value = doc.lookup(&rule.field).filter(|v| !v.is_null());
        let fail = |default: String| {
            Some(ValidationIssue::new(
                rule.field.clone(),
                rule.message.clone().unwrap_or(default),
            ))
        };

        let Some(value) = value else {
            return match rule.rule {
                RuleKind::Required => fail("is required".to_string()),
                _ => None,
            };
        };

        match &rule.rule {
            RuleKind::Required if is_missing(&value) => fail("is required".into()),
            RuleKind::Required => None,
            RuleKind::MinLength { min } => match length(&value) {
                Some(len) if len < *min => fail(format!("must be at least {} long", min)),
                _ => None,
            },
            RuleKind::MaxLength { max } => match length(&value) {
                Some(len) if len > *max => fail(format!("must be at most {} long", max)),
                _ => None,
            },
            RuleKind::Pattern { pattern } => {
                let Some(text) = value.as_str() else {
                    return fail("must be a string".into());
                };
                let regex = match self.registry.pattern(pattern) {
                    Some(regex) => Cow::Borrowed(regex),
                    None => match Regex::new(pattern) {
                        Ok(regex) => Cow::Owned(regex),
                        Err(e) => return fail(format!("has an invalid pattern: {}", e)),
                    },
                };
                if regex.is_match(text) {
                    None
                } else {
                    fail(format!("does not match {}", pattern))
                }
            }
            RuleKind::Enum { values } => {
                let matches = value
                    .as_str()
                    .is_some_and(|s| values.iter().any(|v| v.eq_ignore_ascii_case(s.trim())));
                if matches {
                    None
                } else {
                    fail(format!("must be one of: {}", values.join(", ")))
                }
            }
            RuleKind::Custom { validator } => match self.registry.validator(validator) {
                Some(predicate) if predicate(&value) => None,
                Some(_) => fail(format!("failed {} check", validator)),
                None => fail(format!("unknown validator '{}'", validator)),
            },
        }
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Character count for strings, element count for arrays
fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentRelationship, Fields};
    use serde_json::json;

    fn validator() -> Validator {
        Validator::new(Arc::new(ConfigRegistry::with_defaults()))
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn complete() -> EnrichedDocument {
        EnrichedDocument {
            id: "character_abc".into(),
            doc_type: "character".into(),
            project_id: "proj_x".into(),
            text: "Character: Aladdin\nA street rat with a heart of gold".into(),
            metadata: fields(json!({"name": "Aladdin", "summary": "A resourceful thief"})),
            relationships: vec![DocumentRelationship {
                relationship_type: "knows".into(),
                target: "char_2".into(),
                properties: Fields::new(),
            }],
        }
    }

    #[test]
    fn test_complete_document_is_valid() {
        let result = validator().validate(&complete());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_core_fields_block() {
        let mut doc = complete();
        doc.project_id.clear();
        doc.text = "  ".into();
        let result = validator().validate(&doc);
        assert!(!result.valid);
        assert_eq!(
            result.errors.iter().map(|e| e.field.as_str()).collect::<Vec<_>>(),
            vec!["project_id", "text"]
        );
    }

    #[test]
    fn test_soft_checks_only_warn() {
        let mut doc = complete();
        doc.doc_type = "prop".into();
        doc.text = "Lamp".into();
        doc.metadata.clear();
        doc.relationships.clear();
        let result = validator().validate(&doc);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 3);
    }

    #[test]
    fn test_relationship_without_target_blocks() {
        let mut doc = complete();
        doc.relationships[0].target.clear();
        let result = validator().validate(&doc);
        assert!(!result.valid);
        assert_eq!(result.errors[0].field, "relationships[0].target");
    }

    #[test]
    fn test_config_rules_dispatch() {
        let mut doc = complete();
        doc.metadata.remove("name");
        doc.metadata
            .insert("summary".into(), json!("TODO fill in later"));
        let result = validator().validate(&doc);
        assert!(!result.valid);
        assert_eq!(result.errors[0].field, "name");
        assert_eq!(result.warnings[0].field, "summary");
    }

    #[test]
    fn test_enum_and_pattern_rules() {
        let mut scene = complete();
        scene.doc_type = "scene".into();
        scene.metadata.insert("mood".into(), json!("Tense"));
        assert!(validator().validate(&scene).warnings.is_empty());
        scene.metadata.insert("mood".into(), json!("sleepy"));
        assert_eq!(validator().validate(&scene).warnings.len(), 1);

        let mut location = complete();
        location.doc_type = "location".into();
        location.metadata.insert("setting".into(), json!("Exterior"));
        assert!(validator().validate(&location).warnings.is_empty());
        location.metadata.insert("setting".into(), json!("underwater"));
        assert_eq!(validator().validate(&location).warnings.len(), 1);
    }

    #[test]
    fn test_ensure_valid_maps_to_error() {
        let mut doc = complete();
        doc.id.clear();
        let err = validator().ensure_valid(&doc).unwrap_err();
        assert!(err.to_string().contains("id: is required"));
    }

    #[test]
    fn test_check_input() {
        let v = validator();
        let config = ConfigRegistry::with_defaults().resolve_type("character");
        let raw = RawEntity::from_fields("character", fields(json!({"id": "c", "name": "Aladdin"})));

        assert!(v
            .check_input(&raw, &PrepareOptions::new("proj_x", "character"), &config)
            .is_ok());
        assert!(matches!(
            v.check_input(&raw, &PrepareOptions::new("", "character"), &config),
            Err(PrepError::InvalidInput(_))
        ));

        let nameless = RawEntity::from_fields("character", fields(json!({"id": "c"})));
        assert!(v
            .check_input(&nameless, &PrepareOptions::new("proj_x", "character"), &config)
            .is_err());
    }
}
