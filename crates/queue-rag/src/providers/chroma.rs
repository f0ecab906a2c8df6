//! ChromaDB vector store over the HTTP API

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::VectorDbConfig;
use crate::error::{Error, Result};

use super::vector_store::{validate_batch, CollectionInfo, ScoredDocument, VectorStoreProvider};

const SERVICE: &str = "chroma";

/// Chroma collection record
#[derive(Debug, Deserialize)]
struct ChromaCollection {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<Value>,
}

impl ChromaCollection {
    fn info(&self) -> CollectionInfo {
        let dimension = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("dimension"))
            .and_then(Value::as_u64)
            .map(|d| d as usize);
        CollectionInfo {
            name: self.name.clone(),
            dimension,
        }
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: &'a [String],
    embeddings: &'a [Vec<f32>],
    documents: &'a [String],
}

/// Client for a ChromaDB server
pub struct ChromaVectorStore {
    client: Client,
    base_url: String,
    /// Collection name to server-side id
    ids: DashMap<String, String>,
}

impl ChromaVectorStore {
    /// Create a client for the configured server
    pub fn new(config: &VectorDbConfig) -> Result<Self> {
        Self::with_base_url(&config.base_url(), Duration::from_secs(config.timeout_secs))
    }

    /// Create a client for an explicit base URL
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ids: DashMap::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            if e.is_connect() {
                Error::vector_db(format!("could not connect to {}", self.base_url))
            } else {
                Error::vector_db(e.to_string())
            }
        })
    }

    async fn fail(response: Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::vector_db(format!("HTTP {} - {}", status, body))
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| Error::contract(SERVICE, format!("{}: {}", e, body)))
    }

    async fn fetch_collection(&self, name: &str) -> Result<Option<ChromaCollection>> {
        let response = self.send(self.client.get(self.url(&format!("/collections/{}", name)))).await?;

        if response.status().is_success() {
            let collection: ChromaCollection = Self::parse(response).await?;
            self.ids.insert(collection.name.clone(), collection.id.clone());
            return Ok(Some(collection));
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.contains("does not exist") {
            self.ids.remove(name);
            return Ok(None);
        }
        Err(Error::vector_db(format!("HTTP {} - {}", status, body)))
    }

    async fn collection_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.ids.get(name) {
            return Ok(id.clone());
        }
        match self.fetch_collection(name).await? {
            Some(collection) => Ok(collection.id),
            None => Err(Error::CollectionNotFound(name.to_string())),
        }
    }

    /// Forget a cached id when the server no longer knows it
    async fn check(&self, name: &str, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        if response.status() == StatusCode::NOT_FOUND {
            self.ids.remove(name);
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        Err(Self::fail(response).await)
    }
}

#[async_trait]
impl VectorStoreProvider for ChromaVectorStore {
    async fn get_or_create_collection(&self, name: &str, dimension: usize) -> Result<CollectionInfo> {
        let body = json!({
            "name": name,
            "metadata": {"hnsw:space": "cosine", "dimension": dimension},
            "get_or_create": true,
        });
        let response = self.send(self.client.post(self.url("/collections")).json(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }

        let collection: ChromaCollection = Self::parse(response).await?;
        self.ids.insert(collection.name.clone(), collection.id.clone());
        tracing::debug!(collection = %collection.name, id = %collection.id, "Collection ready");
        Ok(collection.info())
    }

    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.fetch_collection(name).await?.map(|c| c.info()))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let response = self.send(self.client.get(self.url("/collections"))).await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let collections: Vec<ChromaCollection> = Self::parse(response).await?;
        Ok(collections.iter().map(ChromaCollection::info).collect())
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
    ) -> Result<()> {
        validate_batch(ids, embeddings, documents, None)?;
        let id = self.collection_id(collection).await?;

        let request = UpsertRequest {
            ids,
            embeddings,
            documents,
        };
        let response = self
            .send(self.client.post(self.url(&format!("/collections/{}/upsert", id))).json(&request))
            .await?;
        self.check(collection, response).await?;
        Ok(())
    }

    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>> {
        let id = self.collection_id(collection).await?;

        let body = json!({
            "query_embeddings": [embedding],
            "n_results": top_k,
            "include": ["documents", "distances"],
        });
        let response = self
            .send(self.client.post(self.url(&format!("/collections/{}/query", id))).json(&body))
            .await?;
        let response = self.check(collection, response).await?;

        let payload: Value = Self::parse(response).await?;
        parse_query_response(&payload)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let id = self.collection_id(collection).await?;
        let response = self
            .send(self.client.get(self.url(&format!("/collections/{}/count", id))))
            .await?;
        let response = self.check(collection, response).await?;
        Self::parse(response).await
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.url("/heartbeat")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "chroma"
    }
}

/// Unpack the first result row of a Chroma query.
///
/// Chroma returns one list per query embedding; distances are cosine
/// distances, turned into similarity as `1 - distance`.
fn parse_query_response(payload: &Value) -> Result<Vec<ScoredDocument>> {
    let first_row = |field: &str| -> Result<Vec<Value>> {
        let rows = payload
            .get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::contract(SERVICE, format!("'{}' is missing or not a list", field)))?;
        match rows.first() {
            None => Ok(Vec::new()),
            Some(row) => row
                .as_array()
                .cloned()
                .ok_or_else(|| Error::contract(SERVICE, format!("'{}' row is not a list", field))),
        }
    };

    let ids = first_row("ids")?;
    let documents = first_row("documents")?;
    let distances = match payload.get("distances") {
        Some(Value::Null) | None => Vec::new(),
        Some(_) => first_row("distances")?,
    };

    if documents.len() != ids.len() {
        return Err(Error::contract(
            SERVICE,
            format!("{} ids but {} documents", ids.len(), documents.len()),
        ));
    }

    let mut results = Vec::with_capacity(ids.len());
    for (i, (id, document)) in ids.iter().zip(&documents).enumerate() {
        // Entries stored without text carry no context
        let Some(document) = document.as_str() else {
            continue;
        };
        let id = id
            .as_str()
            .ok_or_else(|| Error::contract(SERVICE, "id is not a string"))?;
        let score = distances
            .get(i)
            .and_then(Value::as_f64)
            .map(|d| 1.0 - d as f32)
            .unwrap_or(0.0);
        results.push(ScoredDocument {
            id: id.to_string(),
            document: document.to_string(),
            score,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };

    async fn serve(router: Router) -> ChromaVectorStore {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        ChromaVectorStore::with_base_url(&format!("http://{}", addr), Duration::from_secs(5)).unwrap()
    }

    fn collection_route() -> Router {
        Router::new().route(
            "/api/v1/collections/:name",
            get(|Path(name): Path<String>| async move {
                if name == "document_embeddings" {
                    (
                        StatusCode::OK,
                        Json(json!({
                            "id": "c0ffee",
                            "name": name,
                            "metadata": {"hnsw:space": "cosine", "dimension": 384}
                        })),
                    )
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": format!("ValueError('Collection {} does not exist.')", name)})),
                    )
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_get_collection_reads_dimension() {
        let store = serve(collection_route()).await;

        let info = store.get_collection("document_embeddings").await.unwrap().unwrap();
        assert_eq!(info.dimension, Some(384));
        assert!(store.get_collection("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_maps_distance_to_score() {
        let router = collection_route().route(
            "/api/v1/collections/c0ffee/query",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["n_results"], json!(3));
                Json(json!({
                    "ids": [["doc_4", "doc_1"]],
                    "documents": [["Refunds take 30 days.", "Returns need a receipt."]],
                    "distances": [[0.25, 0.5]],
                }))
            }),
        );
        let store = serve(router).await;

        let results = store
            .query("document_embeddings", &[0.1; 384], 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "doc_4");
        assert_eq!(results[0].document, "Refunds take 30 days.");
        assert!((results[0].score - 0.75).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_missing_collection() {
        let store = serve(collection_route()).await;
        assert!(matches!(
            store.query("missing", &[0.1; 384], 3).await,
            Err(Error::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_query_payload_is_contract_violation() {
        let err = parse_query_response(&json!({"ids": [["a"]], "documents": "oops"})).unwrap_err();
        assert!(err.is_contract_violation());

        let err = parse_query_response(&json!({"ids": [["a", "b"]], "documents": [["x"]]})).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_empty_query_payload() {
        let results = parse_query_response(&json!({"ids": [[]], "documents": [[]], "distances": [[]]})).unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store =
            ChromaVectorStore::with_base_url(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        assert!(!store.health_check().await.unwrap());
    }
}
