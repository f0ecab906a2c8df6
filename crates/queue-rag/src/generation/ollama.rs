//! Ollama HTTP client for embeddings and non-streaming generation

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

/// Thin client over the Ollama REST API
#[derive(Clone)]
pub struct OllamaClient {
    /// HTTP client
    client: Client,
    /// Server base URL without trailing slash
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a client with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client for the generation endpoint
    pub fn for_generation(config: &LlmConfig) -> Result<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Client for the embedding endpoint
    pub fn for_embeddings(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Server base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Embed one text with `model`
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model, prompt: text })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::embedding(format!("could not connect to {}", self.base_url))
                } else {
                    Error::embedding(format!("request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding(format!("HTTP {} - {}", status, body)));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::contract("ollama embeddings", e.to_string()))?;

        if payload.embedding.is_empty() {
            return Err(Error::contract("ollama embeddings", "response carried no embedding"));
        }
        Ok(payload.embedding)
    }

    /// Run a single complete (non-streaming) generation.
    ///
    /// Connection failures, HTTP failures and empty answers each map to their
    /// own fatal error variant.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        tracing::info!(model, prompt_chars = prompt.len(), "Generating answer");

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::LlmUnavailable(self.base_url.clone())
                } else {
                    Error::llm(format!("Generation request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm(format!("Failed to read generation response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::llm(format!("Generation failed: HTTP {} - {}", status, body)));
        }

        let answer = serde_json::from_str::<GenerateResponse>(&body)
            .ok()
            .and_then(|r| r.response)
            .filter(|text| !text.trim().is_empty());

        match answer {
            Some(text) => Ok(text),
            None => Err(Error::EmptyResponse { body }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: &str) -> OllamaClient {
        OllamaClient::new(base_url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_generate_extracts_response_field() {
        let router = Router::new().route(
            "/api/generate",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["stream"], json!(false));
                assert_eq!(req["model"], json!("llama3"));
                Json(json!({"model": "llama3", "response": "Paris.", "done": true}))
            }),
        );
        let base = serve(router).await;

        let answer = client(&base).generate("llama3", "Capital of France?").await.unwrap();
        assert_eq!(answer, "Paris.");
    }

    #[tokio::test]
    async fn test_generate_missing_field_echoes_body() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { Json(json!({"done": true})) }),
        );
        let base = serve(router).await;

        match client(&base).generate("llama3", "hi").await {
            Err(Error::EmptyResponse { body }) => assert!(body.contains("done")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_generate_empty_answer_is_error() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { Json(json!({"response": "  "})) }),
        );
        let base = serve(router).await;

        let err = client(&base).generate("llama3", "hi").await.unwrap_err();
        assert!(matches!(err, Error::EmptyResponse { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_generate_http_error_includes_detail() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::NOT_FOUND, "model 'llama3' not found") }),
        );
        let base = serve(router).await;

        match client(&base).generate("llama3", "hi").await {
            Err(Error::Llm(message)) => {
                assert!(message.contains("404"));
                assert!(message.contains("not found"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_generate_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr))
            .generate("llama3", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LlmUnavailable(_)));
    }

    #[tokio::test]
    async fn test_embed_parses_vector() {
        let router = Router::new().route(
            "/api/embeddings",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["prompt"], json!("refund policy"));
                Json(json!({"embedding": [0.1, 0.2, 0.3]}))
            }),
        );
        let base = serve(router).await;

        let embedding = client(&base).embed("all-minilm", "refund policy").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_without_vector_is_contract_violation() {
        let router = Router::new().route(
            "/api/embeddings",
            post(|| async { Json(json!({"error": "no model"})) }),
        );
        let base = serve(router).await;

        let err = client(&base).embed("all-minilm", "x").await.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_health_check_reports_unreachable_as_false() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!client(&format!("http://{}", addr)).health_check().await.unwrap());
    }
}
