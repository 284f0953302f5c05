//! Typed prompt templates
//!
//! Templates are parsed once into text segments and typed variables.
//! A template can only reference variables from the closed [`TemplateVar`]
//! set, and rendering fails if a declared variable has no value.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Variables a prompt template may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateVar {
    EntityType,
    EntityName,
    EntityText,
    ProjectName,
    ProjectGenre,
    ProjectTone,
    ProjectThemes,
    ContextSummary,
    FieldSchema,
    RelationshipTypes,
    Candidates,
}

impl TemplateVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateVar::EntityType => "entity_type",
            TemplateVar::EntityName => "entity_name",
            TemplateVar::EntityText => "entity_text",
            TemplateVar::ProjectName => "project_name",
            TemplateVar::ProjectGenre => "project_genre",
            TemplateVar::ProjectTone => "project_tone",
            TemplateVar::ProjectThemes => "project_themes",
            TemplateVar::ContextSummary => "context_summary",
            TemplateVar::FieldSchema => "field_schema",
            TemplateVar::RelationshipTypes => "relationship_types",
            TemplateVar::Candidates => "candidates",
        }
    }

    /// Variables available when generating metadata
    pub fn metadata_vars() -> &'static [TemplateVar] {
        &[
            TemplateVar::EntityType,
            TemplateVar::EntityName,
            TemplateVar::EntityText,
            TemplateVar::ProjectName,
            TemplateVar::ProjectGenre,
            TemplateVar::ProjectTone,
            TemplateVar::ProjectThemes,
            TemplateVar::ContextSummary,
            TemplateVar::FieldSchema,
        ]
    }

    /// Variables available when discovering relationships
    pub fn relationship_vars() -> &'static [TemplateVar] {
        &[
            TemplateVar::EntityType,
            TemplateVar::EntityText,
            TemplateVar::ProjectName,
            TemplateVar::RelationshipTypes,
            TemplateVar::Candidates,
        ]
    }
}

impl std::str::FromStr for TemplateVar {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "entity_type" => Ok(TemplateVar::EntityType),
            "entity_name" => Ok(TemplateVar::EntityName),
            "entity_text" => Ok(TemplateVar::EntityText),
            "project_name" => Ok(TemplateVar::ProjectName),
            "project_genre" => Ok(TemplateVar::ProjectGenre),
            "project_tone" => Ok(TemplateVar::ProjectTone),
            "project_themes" => Ok(TemplateVar::ProjectThemes),
            "context_summary" => Ok(TemplateVar::ContextSummary),
            "field_schema" => Ok(TemplateVar::FieldSchema),
            "relationship_types" => Ok(TemplateVar::RelationshipTypes),
            "candidates" => Ok(TemplateVar::Candidates),
            other => Err(format!("Unknown template variable: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(TemplateVar),
}

/// A parsed prompt template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `{{variable}}` markers into typed segments
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                PrepError::Config(format!(
                    "Unclosed template marker near '{}'",
                    &rest[start..rest.len().min(start + 24)]
                ))
            })?;
            let var = after[..end]
                .parse::<TemplateVar>()
                .map_err(PrepError::Config)?;
            segments.push(Segment::Var(var));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Variables this template declares
    pub fn variables(&self) -> BTreeSet<TemplateVar> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Var(v) => Some(*v),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Ensure every declared variable belongs to `allowed`
    pub fn check_allowed(&self, allowed: &[TemplateVar], stage: &str) -> Result<()> {
        for var in self.variables() {
            if !allowed.contains(&var) {
                return Err(PrepError::Config(format!(
                    "Template variable '{}' is not available in the {} stage",
                    var.as_str(),
                    stage
                )));
            }
        }
        Ok(())
    }

    /// Render with the given values
    pub fn render(&self, values: &TemplateValues) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(var) => {
                    let value = values.get(*var).ok_or_else(|| {
                        PrepError::Config(format!(
                            "No value supplied for template variable '{}'",
                            var.as_str()
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = PrepError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PromptTemplate> for String {
    fn from(template: PromptTemplate) -> Self {
        template
            .segments
            .iter()
            .map(|s| match s {
                Segment::Text(t) => t.clone(),
                Segment::Var(v) => format!("{{{{{}}}}}", v.as_str()),
            })
            .collect()
    }
}

/// Values for a template render
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    values: HashMap<TemplateVar, String>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, var: TemplateVar, value: impl Into<String>) -> Self {
        self.values.insert(var, value.into());
        self
    }

    pub fn get(&self, var: TemplateVar) -> Option<&str> {
        self.values.get(&var).map(String::as_str)
    }
}

/// Prompt templates used by the two LLM stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    pub metadata: PromptTemplate,
    pub relationships: PromptTemplate,
}

pub const DEFAULT_METADATA_PROMPT: &str = "You are annotating a {{entity_type}} for the \
production \"{{project_name}}\" (genre: {{project_genre}}; tone: {{project_tone}}; themes: \
{{project_themes}}).\n\nEntity: {{entity_name}}\n{{entity_text}}\n\nProject context:\n\
{{context_summary}}\n\nReturn a JSON object with exactly these fields:\n{{field_schema}}";

pub const DEFAULT_RELATIONSHIP_PROMPT: &str = "Identify relationships between this \
{{entity_type}} and existing entities of \"{{project_name}}\".\n\n{{entity_text}}\n\n\
Allowed relationship types:\n{{relationship_types}}\n\nCandidate entities:\n{{candidates}}\n\n\
Return JSON {\"relationships\": [{\"type\", \"targetId\", \"targetType\", \"confidence\", \
\"reasoning\"}]} using only candidate ids. Confidence is between 0 and 1.";

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            metadata: PromptTemplate::parse(DEFAULT_METADATA_PROMPT)
                .unwrap_or(PromptTemplate { segments: vec![] }),
            relationships: PromptTemplate::parse(DEFAULT_RELATIONSHIP_PROMPT)
                .unwrap_or(PromptTemplate { segments: vec![] }),
        }
    }
}

impl PromptSet {
    /// Check both templates against their stage's variable set
    pub fn check(&self) -> Result<()> {
        self.metadata
            .check_allowed(TemplateVar::metadata_vars(), "metadata")?;
        self.relationships
            .check_allowed(TemplateVar::relationship_vars(), "relationship")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let template = PromptTemplate::parse("Hello {{entity_name}} from {{project_name}}!").unwrap();
        assert_eq!(
            template.variables().into_iter().collect::<Vec<_>>(),
            vec![TemplateVar::EntityName, TemplateVar::ProjectName]
        );

        let values = TemplateValues::new()
            .set(TemplateVar::EntityName, "Aladdin")
            .set(TemplateVar::ProjectName, "Agrabah");
        assert_eq!(template.render(&values).unwrap(), "Hello Aladdin from Agrabah!");
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let err = PromptTemplate::parse("{{favorite_color}}").unwrap_err();
        assert!(matches!(err, PrepError::Config(_)));
    }

    #[test]
    fn test_unclosed_marker_rejected() {
        assert!(PromptTemplate::parse("Hi {{entity_name").is_err());
    }

    #[test]
    fn test_missing_value_fails_render() {
        let template = PromptTemplate::parse("{{entity_text}}").unwrap();
        assert!(template.render(&TemplateValues::new()).is_err());
    }

    #[test]
    fn test_stage_restrictions() {
        let template = PromptTemplate::parse("{{candidates}}").unwrap();
        assert!(template
            .check_allowed(TemplateVar::metadata_vars(), "metadata")
            .is_err());
        assert!(template
            .check_allowed(TemplateVar::relationship_vars(), "relationship")
            .is_ok());
    }

    #[test]
    fn test_serde_round_trip_keeps_source() {
        let source = "Describe {{entity_name}} briefly.";
        let template = PromptTemplate::parse(source).unwrap();
        let json = serde_json::to_string(&template).unwrap();
        assert_eq!(json, format!("\"{}\"", source));
        let back: PromptTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
    }

    #[test]
    fn test_default_prompts_are_valid() {
        PromptSet::default().check().unwrap();
        assert!(!PromptSet::default().metadata.variables().is_empty());
    }
}
