use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::OpenAiConfig;
use crate::error::UpstreamError;
use crate::types::Role;

const SERVICE: &str = "openai";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    /// Ask the provider to constrain output to a JSON object.
    pub json_object: bool,
}

/// Chat-completion seam. Implementations return the first choice's text,
/// which may be empty.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, config: &OpenAiConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }

    fn api_key(&self) -> Result<&str, UpstreamError> {
        if self.api_key.trim().is_empty() {
            return Err(UpstreamError::NotConfigured {
                service: SERVICE,
                detail: "OPENAI_API_KEY not configured",
            });
        }
        Ok(&self.api_key)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key()?)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service: SERVICE,
                status,
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| UpstreamError::malformed(SERVICE, err.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        if request.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }
        let payload = self.post("/chat/completions", body).await?;
        Ok(completion_text(&payload))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError> {
        let payload = self
            .post(
                "/embeddings",
                json!({
                    "model": self.embedding_model,
                    "input": [text],
                }),
            )
            .await?;
        first_embedding(&payload)
    }
}

fn completion_text(payload: &Value) -> String {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

fn first_embedding(payload: &Value) -> Result<Vec<f32>, UpstreamError> {
    let values = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|item| item.get("embedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::malformed(SERVICE, "embedding response missing data"))?;
    let embedding = values
        .iter()
        .filter_map(Value::as_f64)
        .map(|v| v as f32)
        .collect::<Vec<_>>();
    if embedding.is_empty() || embedding.len() != values.len() {
        return Err(UpstreamError::malformed(SERVICE, "embedding has non-numeric values"));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_text_reads_first_choice() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  true \n" } }]
        });
        assert_eq!(completion_text(&payload), "true");
        assert_eq!(completion_text(&json!({ "choices": [] })), "");
    }

    #[test]
    fn embedding_payload_is_validated() {
        let ok = json!({ "data": [{ "embedding": [0.5, -1.0, 0.25] }] });
        assert_eq!(first_embedding(&ok).unwrap(), vec![0.5, -1.0, 0.25]);

        let missing = json!({ "data": [] });
        assert!(matches!(
            first_embedding(&missing),
            Err(UpstreamError::Malformed { .. })
        ));

        let garbage = json!({ "data": [{ "embedding": [0.5, "x"] }] });
        assert!(first_embedding(&garbage).is_err());
    }

    #[test]
    fn prompt_messages_serialize_with_lowercase_roles() {
        let value = serde_json::to_value(PromptMessage::system("hola")).unwrap();
        assert_eq!(value, json!({ "role": "system", "content": "hola" }));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let client = OpenAiClient::new(
            reqwest::Client::new(),
            &OpenAiConfig {
                api_key: " ".to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
                chat_model: "gpt-4o".to_string(),
                classifier_model: "gpt-3.5-turbo".to_string(),
                embedding_model: "text-embedding-ada-002".to_string(),
            },
        );
        let err = client.embed("hola").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured { .. }));
    }
}
