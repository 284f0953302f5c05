//! OpenAI-compatible chat completions client
//!
//! Supports OpenAI, OpenRouter, Azure OpenAI, and other OpenAI-compatible APIs.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{extract_json, LlmClient, LlmRequest, LlmResponse};
use crate::error::{PrepError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    /// Create a new client with default settings
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, None, None)
    }

    /// Create a new client with custom settings
    ///
    /// # Arguments
    /// * `api_key` - API key for authentication
    /// * `base_url` - API base URL (e.g., "https://openrouter.ai/api/v1" for OpenRouter)
    /// * `model` - Model name (e.g., "openai/gpt-4o-mini" for OpenRouter)
    pub fn with_config(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    fn body(&self, request: &LlmRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(context) = &request.context {
            messages.push(json!({"role": "system", "content": context}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature.unwrap_or(0.2),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(schema) = &request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                },
            });
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.body(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PrepError::Llm(format!("LLM API error {}: {}", status, text)));
        }

        let data: Value = response.json().await?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PrepError::Llm("Invalid response format".to_string()))?
            .to_string();
        let tokens_used = data["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;

        let structured = if request.schema.is_some() {
            extract_json(&content)
        } else {
            None
        };

        Ok(LlmResponse {
            content,
            structured,
            tokens_used,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::OutputSchema;

    #[test]
    fn test_body_includes_schema_and_context() {
        let client = OpenAiClient::new("key".into());
        let request = LlmRequest::new("describe")
            .with_context("you are helpful")
            .with_schema(OutputSchema::new("meta", json!({"type": "object"})));
        let body = client.body(&request);

        assert_eq!(body["model"], json!(DEFAULT_MODEL));
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("meta"));
    }
}
