//! OpenAI-compatible embedding client
//!
//! Talks to any server exposing `POST /v1/embeddings` (Ollama, vLLM, OpenAI).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Embedder;
use crate::error::{Result, StoreError};

/// Gateway location and model
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL, e.g. `http://localhost:11434`
    pub base_url: String,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Blocking HTTP embedder
pub struct HttpEmbedder {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let endpoint = format!("{}/v1/embeddings", config.base_url.trim_end_matches('/'));
        log::info!("Embedding gateway: {} (model {})", endpoint, config.model);
        Self {
            agent: ureq::AgentBuilder::new().build(),
            endpoint,
            model: config.model,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = match self
            .agent
            .post(&self.endpoint)
            .timeout(timeout)
            .send_json(&request)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(StoreError::unavailable(format!(
                    "embedding request failed with status {code}: {body}"
                )));
            }
            Err(e) => {
                return Err(StoreError::unavailable(format!(
                    "embedding request failed: {e}"
                )))
            }
        };

        if response.status() != 200 {
            let code = response.status();
            let body = response.into_string().unwrap_or_default();
            return Err(StoreError::unavailable(format!(
                "embedding request failed with status {code}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .into_json()
            .map_err(|e| StoreError::unavailable(format!("invalid embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| StoreError::unavailable("no embeddings returned"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use httpmock::prelude::*;

    fn embedder(server: &MockServer) -> HttpEmbedder {
        HttpEmbedder::new(EmbeddingConfig {
            base_url: server.base_url(),
            model: "nomic-embed-text".into(),
        })
    }

    #[test]
    fn test_embeds_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .json_body(serde_json::json!({"model": "nomic-embed-text", "input": "hello"}));
            then.status(200)
                .json_body(serde_json::json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]}));
        });

        let vector = embedder(&server)
            .embed("hello", Duration::from_secs(5))
            .unwrap();
        mock.assert();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_error_status_includes_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500).body("model not loaded");
        });

        let err = embedder(&server)
            .embed("hello", Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
        assert!(err.to_string().contains("model not loaded"));
    }

    #[test]
    fn test_empty_data_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(serde_json::json!({"data": []}));
        });

        let err = embedder(&server)
            .embed("hello", Duration::from_secs(5))
            .unwrap_err();
        assert!(err.to_string().contains("no embeddings returned"));
    }

    #[test]
    fn test_timeout_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(serde_json::json!({"data": [{"embedding": [1.0]}]}));
        });

        let err = embedder(&server)
            .embed("hello", Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let embedder = HttpEmbedder::new(EmbeddingConfig {
            base_url: "http://localhost:11434/".into(),
            model: "m".into(),
        });
        assert_eq!(embedder.endpoint(), "http://localhost:11434/v1/embeddings");
    }
}
