//! Grounding context for the assistant: embed the question, fetch the nearest
//! passages from the vector index and join their text.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::ai::Embedder;
use crate::config::PineconeConfig;
use crate::error::UpstreamError;

const SERVICE: &str = "pinecone";
const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// Text of the `top_k` passages nearest to `vector`, best first.
    async fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<String>, UpstreamError>;
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn PassageIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn PassageIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    /// Empty string when nothing matches.
    pub async fn context_for(&self, query: &str) -> Result<String, UpstreamError> {
        let vector = self.embedder.embed(query).await?;
        let passages = self.index.nearest(&vector, self.top_k).await?;
        debug!(passages = passages.len(), "retrieved context");
        Ok(passages.join("\n\n"))
    }
}

pub struct PineconeIndex {
    http: reqwest::Client,
    config: PineconeConfig,
    host: OnceCell<String>,
}

impl PineconeIndex {
    pub fn new(http: reqwest::Client, config: PineconeConfig) -> Self {
        Self {
            http,
            config,
            host: OnceCell::new(),
        }
    }

    fn api_key(&self) -> Result<&str, UpstreamError> {
        if self.config.api_key.trim().is_empty() {
            return Err(UpstreamError::NotConfigured {
                service: SERVICE,
                detail: "PINECONE_API_KEY not configured",
            });
        }
        Ok(&self.config.api_key)
    }

    async fn host(&self) -> Result<&str, UpstreamError> {
        let host = self
            .host
            .get_or_try_init(|| async {
                if let Some(host) = &self.config.index_host {
                    return Ok(normalize_host(host));
                }
                self.describe_index_host().await
            })
            .await?;
        Ok(host.as_str())
    }

    async fn describe_index_host(&self) -> Result<String, UpstreamError> {
        if self.config.index_name.trim().is_empty() {
            return Err(UpstreamError::NotConfigured {
                service: SERVICE,
                detail: "PINECONE_INDEXNAME not configured",
            });
        }
        let response = self
            .http
            .get(format!("{CONTROL_PLANE_URL}/indexes/{}", self.config.index_name))
            .header("Api-Key", self.api_key()?)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;
        let payload = read_json(response).await?;
        payload
            .get("host")
            .and_then(Value::as_str)
            .map(normalize_host)
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "index description missing host"))
    }
}

#[async_trait]
impl PassageIndex for PineconeIndex {
    async fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<String>, UpstreamError> {
        let host = self.host().await?;
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(namespace) = &self.config.namespace {
            body["namespace"] = json!(namespace);
        }
        let response = self
            .http
            .post(format!("{host}/query"))
            .header("Api-Key", self.api_key()?)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;
        let payload = read_json(response).await?;
        Ok(passages_from_matches(&payload, &self.config.text_key, top_k))
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, UpstreamError> {
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

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn passages_from_matches(payload: &Value, text_key: &str, top_k: usize) -> Vec<String> {
    payload
        .get("matches")
        .and_then(Value::as_array)
        .map(|matches| {
            matches
                .iter()
                .filter_map(|m| m.get("metadata")?.get(text_key)?.as_str())
                .map(str::to_string)
                .take(top_k)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, UpstreamError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct RecordingIndex {
        passages: Vec<String>,
        asked: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PassageIndex for RecordingIndex {
        async fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<String>, UpstreamError> {
            assert_eq!(vector.len(), 3);
            self.asked.lock().unwrap().push(top_k);
            Ok(self.passages.iter().take(top_k).cloned().collect())
        }
    }

    #[tokio::test]
    async fn joins_passages_with_blank_lines() {
        let index = Arc::new(RecordingIndex {
            passages: vec!["uno".into(), "dos".into()],
            asked: Mutex::new(vec![]),
        });
        let retriever = Retriever::new(Arc::new(FixedEmbedder), index.clone(), 5);
        assert_eq!(retriever.context_for("hola").await.unwrap(), "uno\n\ndos");
        assert_eq!(*index.asked.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn no_matches_gives_empty_context() {
        let index = Arc::new(RecordingIndex {
            passages: vec![],
            asked: Mutex::new(vec![]),
        });
        let retriever = Retriever::new(Arc::new(FixedEmbedder), index, 5);
        assert_eq!(retriever.context_for("hola").await.unwrap(), "");
    }

    #[test]
    fn matches_without_text_are_skipped() {
        let payload = json!({
            "matches": [
                { "id": "a", "score": 0.9, "metadata": { "text": "Peeling químico" } },
                { "id": "b", "score": 0.8 },
                { "id": "c", "score": 0.7, "metadata": { "text": "Depilación láser" } }
            ]
        });
        assert_eq!(
            passages_from_matches(&payload, "text", 5),
            vec!["Peeling químico".to_string(), "Depilación láser".to_string()]
        );
        assert!(passages_from_matches(&json!({}), "text", 5).is_empty());
    }

    #[test]
    fn hosts_get_a_scheme() {
        assert_eq!(
            normalize_host("idx-abc.svc.pinecone.io/"),
            "https://idx-abc.svc.pinecone.io"
        );
        assert_eq!(normalize_host("http://localhost:5080"), "http://localhost:5080");
    }
}
