//! LLM interface used by the metadata and relationship stages
//!
//! Supports:
//! - OpenAI-compatible chat completions - requires `openai` feature
//! - A disabled client that always fails, driving the heuristic fallbacks
//!
//! # Feature Flags
//!
//! - `openai`: Enables the OpenAI-compatible client (requires API key)

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PrepError, Result};

/// JSON schema requested for structured output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: &str, schema: Value) -> Self {
        Self {
            name: name.to_string(),
            schema,
        }
    }

    /// Structural check of `value` against the schema.
    ///
    /// Covers the subset the pipeline emits: object `properties`, `required`,
    /// primitive `type`s and array `items`.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();
        check_node(&self.schema, value, "$", &mut problems);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check_node(schema: &Value, value: &Value, path: &str, problems: &mut Vec<String>) {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            problems.push(format!("{}: expected {}", path, expected));
            return;
        }
    }

    if let (Some(props), Some(obj)) = (
        schema.get("properties").and_then(Value::as_object),
        value.as_object(),
    ) {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    problems.push(format!("{}.{}: missing", path, key));
                }
            }
        }
        for (key, sub) in props {
            if let Some(v) = obj.get(key) {
                check_node(sub, v, &format!("{}.{}", path, key), problems);
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (i, v) in arr.iter().enumerate() {
            check_node(items, v, &format!("{}[{}]", path, i), problems);
        }
    }
}

/// One LLM call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    /// System-level context for the call
    #[serde(default)]
    pub context: Option<String>,
    /// Requests structured output when set
    #[serde(default)]
    pub schema: Option<OutputSchema>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Result of an LLM call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Freeform text
    pub content: String,
    /// Parsed structured output, when requested and supplied
    #[serde(default)]
    pub structured: Option<Value>,
    pub tokens_used: u32,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>, tokens_used: u32) -> Self {
        Self {
            content: content.into(),
            structured: None,
            tokens_used,
        }
    }

    pub fn structured(value: Value, tokens_used: u32) -> Self {
        Self {
            content: value.to_string(),
            structured: Some(value),
            tokens_used,
        }
    }

    /// Structured output, falling back to JSON found in the text content
    pub fn json(&self) -> Result<Value> {
        if let Some(value) = &self.structured {
            return Ok(value.clone());
        }
        extract_json(&self.content)
            .ok_or_else(|| PrepError::Llm("Response contained no JSON object".to_string()))
    }
}

/// Pull the first JSON object out of free text (handles code fences)
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Trait for LLM providers
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn execute(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Client used when no provider is configured; every call fails
#[derive(Debug, Default, Clone)]
pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    async fn execute(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(PrepError::Llm("No LLM provider configured".to_string()))
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" or "disabled"
    pub provider: String,
    pub api_key: Option<String>,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Create an LLM client from configuration
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                PrepError::Config("OPENAI_API_KEY required when BRAINPREP_LLM=openai".to_string())
            })?;
            Ok(Arc::new(OpenAiClient::with_config(
                api_key,
                config.base_url.clone(),
                config.model.clone(),
            )))
        }
        #[cfg(not(feature = "openai"))]
        "openai" => Err(PrepError::Config(
            "The OpenAI client requires the 'openai' feature to be enabled".to_string(),
        )),
        "" | "disabled" | "none" => Ok(Arc::new(DisabledLlm)),
        other => Err(PrepError::Config(format!(
            "Unknown LLM provider: '{}'. Use 'openai' or 'disabled'",
            other
        ))),
    }
}

/// Convenience for building `{"type": "object", ...}` schemas
pub fn object_schema(properties: Map<String, Value>, required: Vec<String>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_validation() {
        let schema = OutputSchema::new(
            "meta",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "keywords": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["summary"]
            }),
        );

        assert!(schema
            .validate(&json!({"summary": "ok", "keywords": ["a"]}))
            .is_ok());

        let problems = schema
            .validate(&json!({"keywords": ["a", 3]}))
            .unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("summary")));
        assert!(problems.iter().any(|p| p.contains("keywords[1]")));
    }

    #[test]
    fn test_extract_json_from_fenced_text() {
        let content = "Here you go:\n```json\n{\"summary\": \"hi\"}\n```";
        assert_eq!(extract_json(content), Some(json!({"summary": "hi"})));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_response_json_prefers_structured() {
        let response = LlmResponse {
            content: "{\"a\": 1}".into(),
            structured: Some(json!({"b": 2})),
            tokens_used: 3,
        };
        assert_eq!(response.json().unwrap(), json!({"b": 2}));
        assert!(LlmResponse::text("plain", 1).json().is_err());
    }

    #[tokio::test]
    async fn test_disabled_client_fails() {
        let err = DisabledLlm.execute(LlmRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, PrepError::Llm(_)));
    }

    #[test]
    fn test_create_llm() {
        assert_eq!(
            create_llm(&LlmConfig::default()).unwrap().model_name(),
            "disabled"
        );
        let unknown = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(create_llm(&unknown).is_err());
    }
}
