//! Remote embedding backend speaking a JSON-over-HTTP protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{EmbeddingBackend, EmbeddingError};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedding backend: `POST {model, input} -> {embeddings}`.
///
/// The dimension is configured, not probed, and every response vector is
/// validated against it.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

impl HttpBackend {
    pub fn new(url: &str, model: &str, dimension: usize) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbeddingError::Init(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpBackend {
    fn id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EmbeddingError::Backend {
                backend: self.model.clone(),
                message: e.to_string(),
            })?;

        let body: EmbedResponse = response.json().await.map_err(|e| EmbeddingError::Backend {
            backend: self.model.clone(),
            message: format!("invalid response body: {e}"),
        })?;

        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Backend {
                backend: self.model.clone(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    body.embeddings.len()
                ),
            });
        }

        for vector in &body.embeddings {
            if vector.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    got: vector.len(),
                });
            }
        }

        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let input = vec!["one".to_string(), "two".to_string()];
        let request = EmbedRequest {
            model: "test-model",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_response_deserialization() {
        let body = r#"{"embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        let parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[0], vec![0.1, 0.2]);
    }
}
